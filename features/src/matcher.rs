use std::collections::BTreeSet;

use stitch_core::FeatureMatch;

use crate::Descriptors;

/// Best-of-2-nearest descriptor matching.
///
/// A tentative match survives the ratio test when its best distance is
/// below `(1 - match_conf)` times the second-best. Matches are gathered in
/// both directions and merged.
pub fn match_descriptors(d1: &Descriptors, d2: &Descriptors, match_conf: f32) -> Vec<FeatureMatch> {
    let ratio = 1.0 - match_conf;
    let mut seen = BTreeSet::new();
    let mut matches = Vec::new();

    for m in two_nearest(d1, d2, ratio) {
        if seen.insert((m.query_idx, m.train_idx)) {
            matches.push(m);
        }
    }
    for m in two_nearest(d2, d1, ratio) {
        let m = m.flipped();
        if seen.insert((m.query_idx, m.train_idx)) {
            matches.push(m);
        }
    }

    matches
}

fn two_nearest(query: &Descriptors, train: &Descriptors, ratio: f32) -> Vec<FeatureMatch> {
    let mut matches = Vec::new();

    for (query_idx, q) in query.iter().enumerate() {
        let mut best: Option<(usize, u32)> = None;
        let mut second: Option<u32> = None;

        for (train_idx, t) in train.iter().enumerate() {
            let distance = q.hamming_distance(t);
            match best {
                None => best = Some((train_idx, distance)),
                Some((_, best_dist)) if distance < best_dist => {
                    second = Some(best_dist);
                    best = Some((train_idx, distance));
                }
                Some(_) => {
                    if second.map_or(true, |s| distance < s) {
                        second = Some(distance);
                    }
                }
            }
        }

        if let Some((train_idx, distance)) = best {
            // The ratio test needs a second neighbour to argue against.
            let passes = match second {
                Some(s) => (distance as f32) < ratio * s as f32,
                None => false,
            };
            if passes {
                matches.push(FeatureMatch::new(query_idx, train_idx, distance as f32));
            }
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Descriptor;
    use stitch_core::KeyPoint;

    fn desc(bits: u8) -> Descriptor {
        Descriptor::new(vec![bits; 8], KeyPoint::default())
    }

    #[test]
    fn distinct_descriptors_pair_up() {
        let d1 = Descriptors {
            descriptors: vec![desc(0b0000_0000), desc(0b1111_1111)],
        };
        let d2 = Descriptors {
            descriptors: vec![desc(0b1111_1111), desc(0b0000_0000)],
        };

        let matches = match_descriptors(&d1, &d2, 0.3);
        assert_eq!(matches.len(), 2);
        assert!(matches.contains(&FeatureMatch::new(0, 1, 0.0)));
        assert!(matches.contains(&FeatureMatch::new(1, 0, 0.0)));
    }

    #[test]
    fn ambiguous_descriptors_fail_ratio_test() {
        // Both train descriptors equally distant: ratio is 1, never below.
        let d1 = Descriptors {
            descriptors: vec![desc(0b0000_1111)],
        };
        let d2 = Descriptors {
            descriptors: vec![desc(0b0000_0000), desc(0b1111_1111)],
        };

        let matches = match_descriptors(&d1, &d2, 0.3);
        assert!(matches.is_empty());
    }

    #[test]
    fn forward_and_backward_matches_deduplicate() {
        let d1 = Descriptors {
            descriptors: vec![desc(0b0000_0001)],
        };
        let d2 = Descriptors {
            descriptors: vec![desc(0b0000_0001), desc(0b1111_0000)],
        };

        let matches = match_descriptors(&d1, &d2, 0.3);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].query_idx, 0);
        assert_eq!(matches[0].train_idx, 0);
    }
}
