use medical_volume::{Affine, AffineBuilder, AxisNormalizer, NiftiGeometry};
use ndarray::{Array3, Array4, IxDyn};
use proptest::prelude::*;

const PERMUTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// Invertible affine whose columns each have one clearly dominant entry.
fn dominant_affine() -> impl Strategy<Value = Affine> {
    (
        0usize..6,
        prop::array::uniform3(prop::bool::ANY),
        prop::array::uniform3(0.5f64..3.0),
        prop::array::uniform9(-0.2f64..0.2),
        prop::array::uniform3(-100.0f64..100.0),
    )
        .prop_map(|(perm, negative, spacing, noise, translation)| {
            let rows = PERMUTATIONS[perm];
            let mut columns = [[0.0; 3]; 3];
            for (c, column) in columns.iter_mut().enumerate() {
                for (r, value) in column.iter_mut().enumerate() {
                    *value = if r == rows[c] {
                        let sign = if negative[c] { -1.0 } else { 1.0 };
                        sign * spacing[c]
                    } else {
                        noise[c * 3 + r]
                    };
                }
            }
            Affine::from_columns(columns, translation)
        })
}

fn integer_volume() -> impl Strategy<Value = Array3<i32>> {
    (1usize..6, 1usize..6, 1usize..6).prop_flat_map(|(a, b, c)| {
        prop::collection::vec(any::<i32>(), a * b * c).prop_map(move |values| {
            Array3::from_shape_vec((a, b, c), values).expect("shape matches length")
        })
    })
}

proptest! {
    #[test]
    fn reverse_undoes_forward(affine in dominant_affine(), array in integer_volume()) {
        let normalizer = AxisNormalizer::default();
        let array = array.into_dyn();
        let outcome = normalizer.forward(array.clone(), &affine).unwrap();
        prop_assert!(!outcome.has_warnings());
        let (normalized, normalized_affine) = outcome.value;

        let m = normalized_affine.matrix();
        for k in 0..3 {
            prop_assert!(m[(k, k)] > 0.0, "diagonal {} not positive: {}", k, m[(k, k)]);
        }
        prop_assert_eq!(normalized.len(), array.len());

        let restored = normalizer.reverse(normalized, &affine).unwrap();
        prop_assert_eq!(restored, array);
    }

    #[test]
    fn real_data_round_trips(affine in dominant_affine(), values in prop::collection::vec(-1e6f64..1e6, 24)) {
        let normalizer = AxisNormalizer::default();
        let array = Array3::from_shape_vec((2, 3, 4), values).unwrap().into_dyn();
        let (normalized, _) = normalizer.forward(array.clone(), &affine).unwrap().value;
        let restored = normalizer.reverse(normalized, &affine).unwrap();
        prop_assert_eq!(restored, array);
    }
}

#[test]
fn time_axis_is_untouched() {
    let affine = Affine::from_columns(
        [[0.0, 0.0, -1.5], [0.0, 2.0, 0.0], [1.0, 0.0, 0.0]],
        [3.0, -4.0, 5.0],
    );
    let array = Array4::from_shape_fn((3, 4, 5, 2), |(i, j, k, t)| (t * 1000 + i * 100 + j * 10 + k) as i32)
        .into_dyn();
    let normalizer = AxisNormalizer::default();
    let (normalized, _) = normalizer.forward(array.clone(), &affine).unwrap().value;
    assert_eq!(normalized.shape()[3], 2);
    // Every time point is normalized the same way.
    for t in 0..2 {
        let at = |idx: [usize; 3]| normalized[IxDyn(&[idx[0], idx[1], idx[2], t])];
        assert_eq!(at([0, 0, 0]) / 1000, t as i32);
    }
    assert_eq!(normalizer.reverse(normalized, &affine).unwrap(), array);
}

#[test]
fn nifti_flip_keeps_boundary_point() {
    let rows = [
        [1.0, 0.0, 0.0, -3.0],
        [0.0, -0.5, 0.0, 8.0],
        [0.0, 0.0, 2.0, 1.0],
        [0.0, 0.0, 0.0, 1.0],
    ];
    let before = Affine::from_rows(rows).unwrap();
    let grid = Array3::from_shape_fn((2, 6, 3), |(i, j, k)| (i * 100 + j * 10 + k) as u8).into_dyn();
    let (flipped, after) =
        AffineBuilder::nifti("scan", &NiftiGeometry { affine: Some(rows) }, grid.clone()).unwrap();

    let m = after.matrix();
    assert!(m[(1, 1)] > 0.0);
    assert_eq!(m[(0, 0)], 1.0);
    assert_eq!(m[(1, 3)], 8.0 + 6.0 * -0.5);
    assert_eq!(flipped[IxDyn(&[1, 0, 2])], grid[IxDyn(&[1, 5, 2])]);

    let old = before.transform_point([0.0, 0.0, 0.0]);
    let new = after.transform_point([0.0, 6.0, 0.0]);
    for (a, b) in old.iter().zip(new.iter()) {
        assert!((a - b).abs() < 1e-12);
    }
}
