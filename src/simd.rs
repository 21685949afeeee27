//! SIMD-accelerated hot-path operations for the device-write loop: volume
//! scaling and f32→i16 conversion for backends that negotiate a 16-bit format.
//!
//! Runtime CPU feature detection picks AVX2, falls back to SSE4.1, falls back
//! to scalar. Safe wrappers around unsafe intrinsics; detection is cached
//! after the first call.

use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    Scalar,
    Sse41,
    Avx2,
}

impl SimdLevel {
    pub fn name(&self) -> &'static str {
        match self {
            SimdLevel::Scalar => "Scalar (no SIMD)",
            SimdLevel::Sse41 => "SSE4.1 (128-bit)",
            SimdLevel::Avx2 => "AVX2 (256-bit)",
        }
    }
}

static SIMD_LEVEL: OnceLock<SimdLevel> = OnceLock::new();

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub fn detect_simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(|| {
        if is_x86_feature_detected!("avx2") {
            SimdLevel::Avx2
        } else if is_x86_feature_detected!("sse4.1") {
            SimdLevel::Sse41
        } else {
            SimdLevel::Scalar
        }
    })
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
pub fn detect_simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(|| SimdLevel::Scalar)
}

/// Apply volume to samples in-place. Unity gain and mute take fast paths that
/// skip the vectorized loop entirely.
#[inline]
pub fn apply_volume(samples: &mut [f32], volume: f32) {
    if (volume - 1.0).abs() < f32::EPSILON {
        return;
    }
    if volume.abs() < f32::EPSILON {
        samples.fill(0.0);
        return;
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        match detect_simd_level() {
            SimdLevel::Avx2 => unsafe { apply_volume_avx2(samples, volume) },
            SimdLevel::Sse41 => unsafe { apply_volume_sse41(samples, volume) },
            SimdLevel::Scalar => apply_volume_scalar(samples, volume),
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        apply_volume_scalar(samples, volume);
    }
}

#[inline(never)]
fn apply_volume_scalar(samples: &mut [f32], volume: f32) {
    for sample in samples.iter_mut() {
        *sample *= volume;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "sse4.1")]
unsafe fn apply_volume_sse41(samples: &mut [f32], volume: f32) {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    let vol = _mm_set1_ps(volume);
    let len = samples.len();
    let ptr = samples.as_mut_ptr();

    let mut i = 0;
    while i + 4 <= len {
        unsafe {
            let data = _mm_loadu_ps(ptr.add(i));
            let scaled = _mm_mul_ps(data, vol);
            _mm_storeu_ps(ptr.add(i), scaled);
        }
        i += 4;
    }
    while i < len {
        unsafe { *ptr.add(i) *= volume };
        i += 1;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2")]
unsafe fn apply_volume_avx2(samples: &mut [f32], volume: f32) {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    let vol = _mm256_set1_ps(volume);
    let len = samples.len();
    let ptr = samples.as_mut_ptr();

    let mut i = 0;
    while i + 8 <= len {
        unsafe {
            let data = _mm256_loadu_ps(ptr.add(i));
            let scaled = _mm256_mul_ps(data, vol);
            _mm256_storeu_ps(ptr.add(i), scaled);
        }
        i += 8;
    }
    while i < len {
        unsafe { *ptr.add(i) *= volume };
        i += 1;
    }
}

/// Convert f32 samples in `[-1.0, 1.0]` to i16 with volume applied in the
/// same pass, for backends that negotiated a 16-bit signed format.
#[inline]
pub fn f32_to_i16_with_volume(input: &[f32], output: &mut [i16], volume: f32) {
    debug_assert_eq!(input.len(), output.len());

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        match detect_simd_level() {
            SimdLevel::Avx2 => unsafe { f32_to_i16_avx2(input, output, volume) },
            SimdLevel::Sse41 => unsafe { f32_to_i16_sse41(input, output, volume) },
            SimdLevel::Scalar => f32_to_i16_scalar(input, output, volume),
        }
    }

    #[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
    {
        f32_to_i16_scalar(input, output, volume);
    }
}

#[inline(never)]
fn f32_to_i16_scalar(input: &[f32], output: &mut [i16], volume: f32) {
    let scale = volume * 32767.0;
    for (inp, out) in input.iter().zip(output.iter_mut()) {
        *out = (*inp * scale).clamp(-32768.0, 32767.0) as i16;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "sse4.1")]
unsafe fn f32_to_i16_sse41(input: &[f32], output: &mut [i16], volume: f32) {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    let scale = _mm_set1_ps(volume * 32767.0);
    let min_val = _mm_set1_ps(-32768.0);
    let max_val = _mm_set1_ps(32767.0);

    let in_ptr = input.as_ptr();
    let out_ptr = output.as_mut_ptr();
    let len = input.len();

    let mut i = 0;
    while i + 4 <= len {
        unsafe {
            let data = _mm_loadu_ps(in_ptr.add(i));
            let scaled = _mm_mul_ps(data, scale);
            let clamped = _mm_min_ps(_mm_max_ps(scaled, min_val), max_val);
            let as_i32 = _mm_cvtps_epi32(clamped);
            let packed = _mm_packs_epi32(as_i32, as_i32);
            _mm_storel_epi64(out_ptr.add(i) as *mut __m128i, packed);
        }
        i += 4;
    }

    let scale_f = volume * 32767.0;
    while i < len {
        output[i] = (input[i] * scale_f).clamp(-32768.0, 32767.0) as i16;
        i += 1;
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
#[target_feature(enable = "avx2")]
unsafe fn f32_to_i16_avx2(input: &[f32], output: &mut [i16], volume: f32) {
    #[cfg(target_arch = "x86")]
    use std::arch::x86::*;
    #[cfg(target_arch = "x86_64")]
    use std::arch::x86_64::*;

    let scale = _mm256_set1_ps(volume * 32767.0);
    let min_val = _mm256_set1_ps(-32768.0);
    let max_val = _mm256_set1_ps(32767.0);

    let in_ptr = input.as_ptr();
    let out_ptr = output.as_mut_ptr();
    let len = input.len();

    let mut i = 0;
    while i + 8 <= len {
        unsafe {
            let data = _mm256_loadu_ps(in_ptr.add(i));
            let scaled = _mm256_mul_ps(data, scale);
            let clamped = _mm256_min_ps(_mm256_max_ps(scaled, min_val), max_val);
            let as_i32 = _mm256_cvtps_epi32(clamped);
            let lo = _mm256_castsi256_si128(as_i32);
            let hi = _mm256_extracti128_si256::<1>(as_i32);
            let packed = _mm_packs_epi32(lo, hi);
            _mm_storeu_si128(out_ptr.add(i) as *mut __m128i, packed);
        }
        i += 8;
    }

    let scale_f = volume * 32767.0;
    while i < len {
        output[i] = (input[i] * scale_f).clamp(-32768.0, 32767.0) as i16;
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_volume_scalar_scales_samples() {
        let mut samples = vec![0.5, -0.5, 1.0, -1.0, 0.0];
        apply_volume_scalar(&mut samples, 0.5);
        assert_eq!(samples, vec![0.25, -0.25, 0.5, -0.5, 0.0]);
    }

    #[test]
    fn apply_volume_unity_gain_is_noop() {
        let original = vec![0.5, -0.5, 1.0, -1.0];
        let mut samples = original.clone();
        apply_volume(&mut samples, 1.0);
        assert_eq!(samples, original);
    }

    #[test]
    fn apply_volume_mute_zeroes_buffer() {
        let mut samples = vec![0.5, -0.5, 1.0, -1.0];
        apply_volume(&mut samples, 0.0);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn apply_volume_handles_various_sizes() {
        for size in [1, 3, 4, 7, 8, 15, 16, 100, 1024] {
            let mut samples: Vec<f32> = (0..size).map(|i| (i as f32) / 100.0).collect();
            let original = samples.clone();
            apply_volume(&mut samples, 0.5);
            for (s, o) in samples.iter().zip(original.iter()) {
                assert!((s - o * 0.5).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn f32_to_i16_scales_and_rounds() {
        let input = vec![0.0, 0.5, -0.5, 1.0, -1.0];
        let mut output = vec![0i16; input.len()];
        f32_to_i16_scalar(&input, &mut output, 1.0);
        assert_eq!(output, vec![0, 16383, -16383, 32767, -32767]);
    }

    #[test]
    fn f32_to_i16_clips_out_of_range_input() {
        let input = vec![2.0, -2.0];
        let mut output = vec![0i16; input.len()];
        f32_to_i16_with_volume(&input, &mut output, 1.0);
        assert_eq!(output[0], 32767);
        assert_eq!(output[1], -32768);
    }

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    #[test]
    fn simd_matches_scalar_for_volume() {
        if detect_simd_level() == SimdLevel::Scalar {
            return;
        }
        let original: Vec<f32> = (0..1024).map(|i| (i as f32 / 512.0) - 1.0).collect();
        let mut scalar = original.clone();
        apply_volume_scalar(&mut scalar, 0.7);
        let mut simd = original.clone();
        apply_volume(&mut simd, 0.7);
        for (s, d) in scalar.iter().zip(simd.iter()) {
            assert!((s - d).abs() < 1e-6);
        }
    }
}
