// Swaps the process-wide accelerator, so it runs in its own test binary.

use std::sync::{Arc, Mutex};

use ember_ai::backend::{accelerator, install_accelerator, uninstall_accelerator};
use ember_ai::device::emulated::EmulatedAccelerator;
use ember_ai::memory::Placement;
use ember_ai::ops::loss::cross_entropy_gradient;
use ember_ai::ops::optim::{AdamMoments, sgd_update};
use ember_ai::{Error, Kernels, Tensor, Tensor2D, tensor2d};

static REGISTRY: Mutex<()> = Mutex::new(());

#[test]
fn test_registry_swap_keeps_live_buffers_on_their_accelerator() {
    let _guard = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    let first = Arc::new(EmulatedAccelerator::new());
    let second = Arc::new(EmulatedAccelerator::new());

    assert!(install_accelerator(first.clone()).is_none());
    let mut a = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
    a.to_device().unwrap();
    assert_eq!(first.live_buffers(), 1);

    assert!(install_accelerator(second.clone()).is_some());
    let mut b = Tensor2D::filled(2, 2, 1.0);
    b.to_device().unwrap();
    assert_eq!(second.live_buffers(), 1);

    assert!(matches!(
        Kernels::serial().matrix_mult(&a, &b),
        Err(Error::PlacementMismatch)
    ));
    assert!(matches!(a.add(&b), Err(Error::PlacementMismatch)));

    // the first accelerator still serves its own buffer
    a.to_host().unwrap();
    assert_eq!(a.to_vec().unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    assert_eq!(first.live_buffers(), 0);

    drop(b);
    assert_eq!(second.live_buffers(), 0);

    assert!(uninstall_accelerator().is_some());
    assert!(matches!(accelerator(), Err(Error::AcceleratorMissing)));
}

#[test]
fn test_training_primitives_reject_mixed_accelerators() {
    let _guard = REGISTRY.lock().unwrap_or_else(|e| e.into_inner());
    let first = Arc::new(EmulatedAccelerator::new());
    let second = Arc::new(EmulatedAccelerator::new());

    install_accelerator(first.clone());
    let mut params = tensor2d!([[1.0, 1.0]]);
    params.to_device().unwrap();
    let mut moments = AdamMoments::new(2, Placement::Device).unwrap();

    install_accelerator(second.clone());
    let mut grads = tensor2d!([[10.0, 10.0]]);
    grads.to_device().unwrap();
    let mut same_side = tensor2d!([[1.0, 1.0]]);
    same_side.to_device().unwrap();

    assert!(matches!(
        sgd_update(&mut params, &grads, 0.5),
        Err(Error::PlacementMismatch)
    ));
    assert!(matches!(
        moments.update(&mut params, &grads, 0.01),
        Err(Error::PlacementMismatch)
    ));
    // params and grads agree, but the moments belong to the first accelerator
    assert!(matches!(
        moments.update(&mut same_side, &grads, 0.01),
        Err(Error::PlacementMismatch)
    ));
    assert_eq!(moments.time_step(), 1);

    let mut gradient = Tensor2D::new(1, 2);
    gradient.to_device().unwrap();
    assert!(matches!(
        cross_entropy_gradient(&params, &grads, &mut gradient),
        Err(Error::PlacementMismatch)
    ));

    // nothing was written on either side
    params.to_host().unwrap();
    grads.to_host().unwrap();
    same_side.to_host().unwrap();
    assert_eq!(params.to_vec().unwrap(), vec![1.0, 1.0]);
    assert_eq!(grads.to_vec().unwrap(), vec![10.0, 10.0]);
    assert_eq!(same_side.to_vec().unwrap(), vec![1.0, 1.0]);

    drop(moments);
    drop(gradient);
    assert_eq!(first.live_buffers(), 0);
    assert_eq!(second.live_buffers(), 0);
    uninstall_accelerator();
}
