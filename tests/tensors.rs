// No accelerator is ever installed in this test binary.

use ember_ai::backend::has_accelerator;
use ember_ai::{Error, Placement, Tensor, Tensor2D, Tensor3D, tensor2d, tensor3d};

#[test]
fn test_tensor2d_macro() {
    let t = tensor2d!([[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]]);
    assert_eq!((t.rows(), t.cols()), (3, 2));
    assert_eq!(t.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(t.rank(), 2);
}

#[test]
fn test_tensor3d_macro_is_depth_major() {
    let t = tensor3d!([[[1.0, 2.0], [3.0, 4.0]], [[5.0, 6.0], [7.0, 8.0]]]);
    assert_eq!((t.rows(), t.cols(), t.depth()), (2, 2, 2));
    assert_eq!(t.get_at(1, 0, 1).unwrap(), 7.0);
    assert_eq!(t.rank(), 3);
}

#[test]
#[should_panic(expected = "ragged")]
fn test_ragged_literal_panics() {
    let _ = tensor2d!([[1.0, 2.0], [3.0]]);
}

#[test]
fn test_tensor_shape_mismatch_panics() {
    let result = std::panic::catch_unwind(|| Tensor2D::from_vec(2, 2, vec![1.0, 2.0, 3.0]));
    assert!(result.is_err());
}

#[test]
fn test_text_round_trip() {
    let t = tensor3d!([[[1.5, -2.0]], [[0.25, 4.0]]]);
    let text = t.to_text().unwrap();
    assert_eq!(text, "1.5 -2 0.25 4");
    let back = Tensor3D::from_text(1, 2, 2, &text).unwrap();
    assert_eq!(back, t);
}

#[test]
fn test_from_text_counts_values() {
    assert!(matches!(
        Tensor2D::from_text(2, 2, "1 2 3"),
        Err(Error::Parse(_))
    ));
    assert!(matches!(
        Tensor2D::from_text(1, 2, "1 two"),
        Err(Error::Parse(_))
    ));
}

#[test]
fn test_arithmetic_in_place() {
    let mut a = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
    let b = tensor2d!([[4.0, 3.0], [2.0, 1.0]]);
    a.add(&b).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![5.0; 4]);
    a.mult_scalar(2.0).unwrap();
    a.sub(&b).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![6.0, 7.0, 8.0, 9.0]);
    a.div_scalar(2.0).unwrap();
    assert_eq!(a.get_at(0, 0).unwrap(), 3.0);
}

#[test]
fn test_clone_is_deep() {
    let a = tensor2d!([[1.0, 2.0]]);
    let mut b = a.try_clone().unwrap();
    b.fill(0.0).unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0]);
    assert!(!b.is_watcher());
}

#[test]
fn test_to_device_without_accelerator() {
    assert!(!has_accelerator());
    let mut t = Tensor2D::new(2, 2);
    assert!(matches!(t.to_device(), Err(Error::AcceleratorMissing)));
    assert_eq!(t.placement(), Placement::Host);
    assert!(matches!(
        Tensor3D::filled_on(1, 1, 1, 0.0, Placement::Device),
        Err(Error::AcceleratorMissing)
    ));
}

#[test]
fn test_to_host_is_a_no_op_on_host() {
    let mut t = tensor2d!([[1.0]]);
    t.to_host().unwrap();
    assert_eq!(t.get_at(0, 0).unwrap(), 1.0);
}
