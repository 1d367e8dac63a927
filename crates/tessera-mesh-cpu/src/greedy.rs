/// Greedy rectangle merge over a `width × height` mask, row by row: extend
/// right while keys match, then extend down while the whole row span matches.
/// Cells whose key is not mergeable come out as single-cell rectangles.
/// Consumed cells are cleared; `emit` receives `(i, j, w, h, key)`.
pub(crate) fn merge_mask<K: Copy + PartialEq>(
    mask: &mut [Option<K>],
    width: usize,
    height: usize,
    mergeable: impl Fn(&K) -> bool,
    mut emit: impl FnMut(usize, usize, usize, usize, K),
) {
    debug_assert_eq!(mask.len(), width * height);
    for j in 0..height {
        let mut i = 0;
        while i < width {
            let Some(key) = mask[j * width + i] else {
                i += 1;
                continue;
            };

            let mut quad_width = 1;
            let mut quad_height = 1;
            if mergeable(&key) {
                while i + quad_width < width && mask[j * width + i + quad_width] == Some(key) {
                    quad_width += 1;
                }
                'scan: while j + quad_height < height {
                    let row = (j + quad_height) * width;
                    for k in 0..quad_width {
                        if mask[row + i + k] != Some(key) {
                            break 'scan;
                        }
                    }
                    quad_height += 1;
                }
            }

            for dj in 0..quad_height {
                let row = (j + dj) * width;
                for cell in &mut mask[row + i..row + i + quad_width] {
                    *cell = None;
                }
            }
            emit(i, j, quad_width, quad_height, key);
            i += quad_width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(mask: &mut [Option<u8>], w: usize, h: usize, merge: bool) -> Vec<(usize, usize, usize, usize, u8)> {
        let mut out = Vec::new();
        merge_mask(mask, w, h, |_| merge, |i, j, qw, qh, k| out.push((i, j, qw, qh, k)));
        out
    }

    #[test]
    fn uniform_mask_becomes_one_rectangle() {
        let mut mask = vec![Some(1u8); 12];
        assert_eq!(collect(&mut mask, 4, 3, true), vec![(0, 0, 4, 3, 1)]);
        assert!(mask.iter().all(Option::is_none));
    }

    #[test]
    fn differing_keys_split_rectangles() {
        #[rustfmt::skip]
        let mut mask = vec![
            Some(1), Some(1), Some(2),
            Some(1), Some(1), None,
        ];
        assert_eq!(
            collect(&mut mask, 3, 2, true),
            vec![(0, 0, 2, 2, 1), (2, 0, 1, 1, 2)]
        );
    }

    #[test]
    fn unmergeable_keys_stay_single_cells() {
        let mut mask = vec![Some(7u8); 4];
        assert_eq!(collect(&mut mask, 2, 2, false).len(), 4);
    }
}
