//! Windowed RMS reduction of a whole file into a fixed-size envelope.

use super::service::CancellationToken;
use super::{WaveformEnvelope, WaveformError};
use crate::cursor::CursorState;

/// Compute a `point_count`-point RMS envelope over the whole file.
///
/// The caller must already hold the cursor lock; streaming reads and
/// waveform scans are mutually exclusive. The cursor position recorded at
/// entry is restored on every exit path, including cancellation, so a
/// subsequent read resumes exactly where it left off. The scan walks the
/// file in native frames; client-rate rescaling never enters the loop.
pub(crate) fn compute_envelope(
    state: &mut CursorState,
    point_count: usize,
    token: &CancellationToken,
) -> Result<WaveformEnvelope, WaveformError> {
    if point_count == 0 {
        return Err(WaveformError::InvalidPointCount);
    }

    let saved = state.position;
    let result = scan(state, point_count, token);

    let restore = state.backend.seek(saved);
    state.converter.reset();
    match restore {
        Ok(()) => {
            state.position = saved;
            if let Some(observer) = state.observer.as_mut() {
                observer.on_position_changed(saved);
            }
        }
        Err(error) => {
            if result.is_ok() {
                return Err(WaveformError::Scan(error));
            }
        }
    }
    result
}

fn scan(
    state: &mut CursorState,
    point_count: usize,
    token: &CancellationToken,
) -> Result<WaveformEnvelope, WaveformError> {
    state.backend.seek(0).map_err(WaveformError::Scan)?;
    state.position = 0;

    let channels = state.converter.client_channels().max(1);
    let total_frames = state.backend.total_frames();
    let frames_per_point = total_frames as f64 / point_count as f64;

    let mut magnitudes = vec![Vec::with_capacity(point_count); channels];
    let mut consumed = 0u64;
    for point in 0..point_count {
        if token.is_cancelled() {
            return Err(WaveformError::Cancelled);
        }
        // Cumulative rounding keeps the windows tiling the file exactly.
        let window_end = ((point + 1) as f64 * frames_per_point).round() as u64;
        let window = window_end.saturating_sub(consumed) as usize;

        let read = if window > 0 {
            let read = state.backend.read(window).map_err(WaveformError::Scan)?;
            consumed += read.frames as u64;
            state.position = consumed;
            Some(read)
        } else {
            None
        };

        for (channel, points) in magnitudes.iter_mut().enumerate() {
            let rms = match read.as_ref() {
                Some(read) if read.frames > 0 => {
                    root_mean_square(source_channel(&read.channels, channel))
                }
                _ => 0.0,
            };
            points.push(rms);
        }
    }

    Ok(WaveformEnvelope::new(magnitudes))
}

/// Map a client channel index onto the decoded buffers, duplicating the
/// last native channel when the client asks for more.
fn source_channel(channels: &[Vec<f32>], index: usize) -> &[f32] {
    channels
        .get(index)
        .or_else(|| channels.last())
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// `sqrt(mean(x^2))` over one window; an empty window is 0.0 by definition.
fn root_mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&v| f64::from(v) * f64::from(v)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DecodingBackend;
    use crate::backend::testing::SynthBackend;
    use crate::convert::SampleConverter;
    use crate::format::{PcmFormat, SampleEncoding};

    fn stereo(rate: u32) -> PcmFormat {
        PcmFormat::new(rate, 2, false, SampleEncoding::Float).expect("valid format")
    }

    fn state_over(backend: SynthBackend) -> CursorState {
        let native = backend.native_format();
        CursorState {
            backend: Box::new(backend),
            converter: SampleConverter::new(native, native),
            position: 0,
            observer: None,
        }
    }

    #[test]
    fn square_wave_rms_equals_amplitude() {
        let native = stereo(44_100);
        let wave: Vec<f32> = (0..44_100)
            .map(|i| if (i / 64) % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        let mut state = state_over(SynthBackend::new(native, vec![wave.clone(), wave]));

        let envelope =
            compute_envelope(&mut state, 10, &CancellationToken::new()).expect("envelope");
        assert_eq!(envelope.channel_count(), 2);
        for channel in 0..2 {
            let points = envelope.channel(channel).expect("channel");
            assert_eq!(points.len(), 10);
            for &point in points {
                assert!((point - 0.5).abs() < 1e-4, "point {point} should be 0.5");
            }
        }
        assert_eq!(envelope.channel(0), envelope.channel(1));
    }

    #[test]
    fn constant_amplitude_rms_is_absolute_value() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 800, -0.75));
        let envelope =
            compute_envelope(&mut state, 4, &CancellationToken::new()).expect("envelope");
        for &point in envelope.channel(0).expect("channel") {
            assert!((point - 0.75).abs() < 1e-6);
        }
    }

    #[test]
    fn all_zero_window_is_exactly_zero() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 512, 0.0));
        let envelope =
            compute_envelope(&mut state, 8, &CancellationToken::new()).expect("envelope");
        for channel in envelope.channels() {
            assert!(channel.iter().all(|&point| point == 0.0));
        }
    }

    #[test]
    fn empty_file_yields_all_zero_envelope() {
        let native = stereo(44_100);
        let mut state = state_over(SynthBackend::constant(native, 0, 0.0));
        let envelope =
            compute_envelope(&mut state, 1_024, &CancellationToken::new()).expect("envelope");
        assert_eq!(envelope.point_count(), 1_024);
        assert_eq!(envelope.channel_count(), 2);
        for channel in envelope.channels() {
            assert!(channel.iter().all(|&point| point == 0.0));
        }
    }

    #[test]
    fn fewer_frames_than_points_pads_with_zero_windows() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 3, 0.5));
        let envelope =
            compute_envelope(&mut state, 10, &CancellationToken::new()).expect("envelope");
        let points = envelope.channel(0).expect("channel");
        assert_eq!(points.len(), 10);
        assert!(points.iter().any(|&point| point == 0.0));
        assert!(points.iter().any(|&point| (point - 0.5).abs() < 1e-6));
    }

    #[test]
    fn zero_point_count_is_rejected() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 16, 0.1));
        let err = compute_envelope(&mut state, 0, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, WaveformError::InvalidPointCount));
    }

    #[test]
    fn cursor_position_is_restored_after_scan() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 400, 0.25));
        state.seek(123).expect("seek");

        compute_envelope(&mut state, 7, &CancellationToken::new()).expect("envelope");
        assert_eq!(state.position, 123);

        // And again when the scan is cancelled mid-way.
        let token = CancellationToken::new();
        token.cancel();
        let err = compute_envelope(&mut state, 7, &token).unwrap_err();
        assert!(matches!(err, WaveformError::Cancelled));
        assert_eq!(state.position, 123);
    }

    #[test]
    fn cancelled_scan_returns_no_partial_envelope() {
        let native = stereo(8_000);
        let mut state = state_over(SynthBackend::constant(native, 100, 0.5));
        let token = CancellationToken::new();
        token.cancel();
        assert!(matches!(
            compute_envelope(&mut state, 4, &token),
            Err(WaveformError::Cancelled)
        ));
    }

    #[test]
    fn backend_read_failure_propagates() {
        let native = stereo(8_000);
        let mut backend = SynthBackend::constant(native, 64, 0.5);
        backend.fail_reads = true;
        let mut state = state_over(backend);
        let err = compute_envelope(&mut state, 4, &CancellationToken::new()).unwrap_err();
        assert!(matches!(
            err,
            WaveformError::Scan(crate::error::AudioFileError::ReadFailed { .. })
        ));
    }

    #[test]
    fn rms_of_known_window() {
        assert_eq!(root_mean_square(&[]), 0.0);
        assert!((root_mean_square(&[3.0, 4.0]) - (12.5_f32).sqrt()).abs() < 1e-6);
        assert!((root_mean_square(&[-0.5, 0.5, -0.5, 0.5]) - 0.5).abs() < 1e-7);
    }
}
