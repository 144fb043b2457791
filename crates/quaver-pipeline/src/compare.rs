//! Fingerprint similarity, following acoustid's `compare2` comparator.
//!
//! Two fingerprints are aligned by the most popular item-offset between
//! them, then scored by bit error over the overlapping region. Scores run
//! 0.0 to 1.0; low-diversity inputs (silence, drones) get their score
//! pushed down hard because they cross-match everything.

/// Items agree on their top 14 bits for alignment purposes.
const MATCH_BITS: u32 = 14;
const MATCH_MASK: usize = (1 << MATCH_BITS) - 1;

/// Two tracks are duplicates above this score.
pub const SIMILARITY_THRESHOLD: f32 = 0.90;

/// Two tracks are never duplicates if their measured durations differ by
/// more than this many seconds.
pub const MAX_DURATION_DELTA_S: f64 = 7.0;

/// Alignment search window, in items.
pub const DEFAULT_MAX_OFFSET: i32 = 80;

const fn strip(item: u32) -> usize {
    (item >> (32 - MATCH_BITS)) as usize
}

/// Similarity of two raw fingerprints in `[0, 1]`.
///
/// `max_offset` bounds the alignment search; `0` means unbounded.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
#[must_use]
pub fn similarity(a: &[u32], b: &[u32], max_offset: i32) -> f32 {
    let mut counts = vec![0u16; a.len() + b.len() + 1];
    let mut aoffsets = vec![0u16; MATCH_MASK + 1];
    let mut boffsets = vec![0u16; MATCH_MASK + 1];

    for (i, &item) in a.iter().enumerate() {
        aoffsets[strip(item)] = i as u16;
    }
    for (i, &item) in b.iter().enumerate() {
        boffsets[strip(item)] = i as u16;
    }

    // histogram the offsets items agree on; position 0 never registers,
    // which matches the reference comparator
    let mut topcount = 0u16;
    let mut topoffset = 0i32;
    for i in 0..MATCH_MASK {
        if aoffsets[i] != 0 && boffsets[i] != 0 {
            let offset = i32::from(aoffsets[i]) - i32::from(boffsets[i]);
            if max_offset == 0 || (-max_offset <= offset && offset <= max_offset) {
                let slot = (offset + b.len() as i32) as usize;
                counts[slot] += 1;
                if counts[slot] > topcount {
                    topcount = counts[slot];
                    topoffset = offset;
                }
            }
        }
    }

    // overlap length is judged against the pre-alignment size
    let minsize = a.len().min(b.len()) & !1;

    let (a, b) = if topoffset < 0 {
        (a, b.get((-topoffset) as usize..).unwrap_or(&[]))
    } else {
        (a.get(topoffset as usize..).unwrap_or(&[]), b)
    };

    // scored in 64-bit strides
    let size = a.len().min(b.len()) / 2;
    if size == 0 || minsize == 0 {
        return 0.0;
    }

    let auniq = unique_stripped(a);
    let buniq = unique_stripped(b);

    let diversity = f32::min(
        f32::min(1.0, (auniq + 10) as f32 / a.len() as f32 + 0.5),
        f32::min(1.0, (buniq + 10) as f32 / b.len() as f32 + 0.5),
    );

    if f32::from(topcount) < auniq.max(buniq) as f32 * 0.02 {
        // best alignment is backed by under 2% of the unique items
        return 0.0;
    }

    let mut biterror = 0u64;
    for i in 0..size {
        biterror += u64::from((a[2 * i] ^ b[2 * i]).count_ones());
        biterror += u64::from((a[2 * i + 1] ^ b[2 * i + 1]).count_ones());
    }

    let mut score = (size as f32 * 2.0 / minsize as f32)
        * (1.0 - 2.0 * biterror as f32 / (64.0 * size as f32));
    if score < 0.0 {
        score = 0.0;
    }
    if diversity < 1.0 {
        score = score.powf(7.0f32.mul_add(-diversity, 8.0));
    }
    score
}

fn unique_stripped(items: &[u32]) -> usize {
    let mut seen = vec![false; MATCH_MASK + 1];
    let mut uniq = 0;
    for &item in items {
        let key = strip(item);
        if !seen[key] {
            uniq += 1;
            seen[key] = true;
        }
    }
    uniq
}

/// The duplicate predicate: similar enough, and with durations close
/// enough that the match cannot be a sampled fragment.
#[must_use]
pub fn is_match(score: f32, duration_a: f64, duration_b: f64) -> bool {
    score > SIMILARITY_THRESHOLD && (duration_a - duration_b).abs() <= MAX_DURATION_DELTA_S
}

#[cfg(test)]
mod tests {
    use super::*;

    // deterministic pseudo-random items; real fingerprints are similarly
    // high-entropy
    fn lcg_items(seed: u64, n: usize) -> Vec<u32> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state
                    .wrapping_mul(6_364_136_223_846_793_005)
                    .wrapping_add(1_442_695_040_888_963_407);
                (state >> 32) as u32
            })
            .collect()
    }

    #[test]
    fn identical_fingerprints_score_one() {
        let fp = lcg_items(7, 256);
        let score = similarity(&fp, &fp, DEFAULT_MAX_OFFSET);
        assert!((score - 1.0).abs() < 1e-6, "score {score}");
    }

    #[test]
    fn shifted_subsequence_scores_high() {
        let fp = lcg_items(7, 256);
        let shifted = fp[16..].to_vec();
        let score = similarity(&fp, &shifted, DEFAULT_MAX_OFFSET);
        assert!(score > SIMILARITY_THRESHOLD, "score {score}");
    }

    #[test]
    fn unrelated_fingerprints_score_low() {
        let a = lcg_items(7, 256);
        let b = lcg_items(99, 256);
        let score = similarity(&a, &b, DEFAULT_MAX_OFFSET);
        assert!(score < 0.5, "score {score}");
    }

    #[test]
    fn empty_input_scores_zero() {
        let fp = lcg_items(7, 64);
        assert_eq!(similarity(&fp, &[], DEFAULT_MAX_OFFSET), 0.0);
        assert_eq!(similarity(&[], &[], DEFAULT_MAX_OFFSET), 0.0);
    }

    #[test]
    fn low_diversity_is_punished() {
        // same bit error either way; the constant fingerprint must come
        // out worse because its diversity exponent kicks in
        fn with_noise(base: &[u32]) -> f32 {
            let mut noisy = base.to_vec();
            for item in noisy.iter_mut().take(32) {
                *item ^= 1;
            }
            similarity(base, &noisy, DEFAULT_MAX_OFFSET)
        }
        let diverse = with_noise(&lcg_items(7, 128));
        let flat = with_noise(&vec![0x8000_0000u32; 128]);
        assert!(diverse > 0.98, "diverse {diverse}");
        assert!(flat < diverse - 0.02, "flat {flat} vs diverse {diverse}");
    }

    #[test]
    fn match_predicate_boundaries() {
        assert!(!is_match(SIMILARITY_THRESHOLD, 30.0, 30.0));
        assert!(is_match(0.95, 30.0, 37.0));
        assert!(!is_match(0.95, 30.0, 37.01));
    }
}
