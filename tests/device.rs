use std::sync::{Arc, Once};

use ember_ai::approx::ApproxEquality::{self, Partial, Precise};
use ember_ai::approx::RelativeEq;
use ember_ai::backend::install_accelerator;
use ember_ai::device::Accelerator;
use ember_ai::device::emulated::EmulatedAccelerator;
use ember_ai::memory::DeviceBuffer;
use ember_ai::ops::activation::{Activation, activate};
use ember_ai::ops::functions::{random_2d, random_3d};
use ember_ai::ops::loss::cross_entropy_gradient;
use ember_ai::ops::optim::{AdamMoments, sgd_update};
use ember_ai::{
    ComputeConfig, Error, Kernels, Placement, Tensor, Tensor2D, Tensor3D, Window, tensor2d,
};


fn setup() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        install_accelerator(Arc::new(EmulatedAccelerator::new()));
    });
}

fn kernels() -> Kernels {
    Kernels::from_config(&ComputeConfig::default().with_threads(4)).unwrap()
}

fn device_2d(t: &Tensor2D<'_>) -> Tensor2D<'static> {
    let mut copy = t.try_clone().unwrap();
    copy.to_device().unwrap();
    copy
}

fn device_3d(t: &Tensor3D<'_>) -> Tensor3D<'static> {
    let mut copy = t.try_clone().unwrap();
    copy.to_device().unwrap();
    copy
}

fn host_values_2d(mut t: Tensor2D<'static>) -> Vec<f32> {
    t.to_host().unwrap();
    t.to_vec().unwrap()
}

fn assert_agrees(host: &[f32], device: &[f32], worst: ApproxEquality) {
    let rating = host.approx_eq(device);
    assert!(rating <= worst, "device result rated {rating:?}, expected at most {worst:?}");
}

fn host_values_3d(mut t: Tensor3D<'static>) -> Vec<f32> {
    t.to_host().unwrap();
    t.to_vec().unwrap()
}

#[test]
fn test_round_trip_is_lossless() {
    setup();
    let original = random_3d(3, 4, 2, -5.0, 5.0, Placement::Host).unwrap();
    let mut moved = original.try_clone().unwrap();
    moved.to_device().unwrap();
    assert!(moved.is_on_device());
    moved.to_host().unwrap();
    assert_eq!(moved, original);
}

#[test]
fn test_device_tensor_has_no_element_access() {
    setup();
    let mut t = device_2d(&tensor2d!([[1.0, 2.0]]));
    assert!(matches!(t.get_at(0, 0), Err(Error::DataOnDevice)));
    assert!(matches!(t.to_vec(), Err(Error::DataOnDevice)));
    assert!(matches!(t.map(|v| v + 1.0), Err(Error::HostClosureOnDevice)));
    t.add_scalar(1.0).unwrap();
    assert_eq!(host_values_2d(t), vec![2.0, 3.0]);
}

#[test]
fn test_matmul_variants_agree_across_placements() {
    setup();
    let kernels = kernels();
    let a = random_2d(5, 3, -1.0, 1.0, Placement::Host).unwrap();
    let b = random_2d(3, 4, -1.0, 1.0, Placement::Host).unwrap();
    let c = random_2d(5, 4, -1.0, 1.0, Placement::Host).unwrap();
    let d = random_2d(6, 3, -1.0, 1.0, Placement::Host).unwrap();
    let (da, db, dc, dd) = (device_2d(&a), device_2d(&b), device_2d(&c), device_2d(&d));

    let host = kernels.matrix_mult(&a, &b).unwrap();
    let device = kernels.matrix_mult(&da, &db).unwrap();
    assert!(device.is_on_device());
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Precise);

    let host = kernels.matrix_mult_left_transpose(&a, &c).unwrap();
    let device = kernels.matrix_mult_left_transpose(&da, &dc).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Precise);

    let host = kernels.matrix_mult_right_transpose(&a, &d).unwrap();
    let device = kernels.matrix_mult_right_transpose(&da, &dd).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Precise);
}

#[test]
fn test_convolution_modes_agree_across_placements() {
    setup();
    let kernels = kernels();
    let image = random_2d(6, 6, -1.0, 1.0, Placement::Host).unwrap();
    let volume = random_3d(6, 6, 3, -1.0, 1.0, Placement::Host).unwrap();
    let k2 = random_2d(3, 3, -1.0, 1.0, Placement::Host).unwrap();
    let k3 = random_3d(3, 3, 3, -1.0, 1.0, Placement::Host).unwrap();
    let (d_image, d_volume) = (device_2d(&image), device_3d(&volume));
    let (d_k2, d_k3) = (device_2d(&k2), device_3d(&k3));

    // 2D on 2D, flipped, with padding and stride
    let host = kernels.convolve_kernel_flip(&image, &k2, 2, 1).unwrap();
    let device = kernels.convolve_kernel_flip(&d_image, &d_k2, 2, 1).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Precise);

    // 3D on 3D summed into 2D
    let host = kernels.convolve(&volume, &k3, 1, 0).unwrap();
    let device = kernels.convolve(&d_volume, &d_k3, 1, 0).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Partial);

    // 2D kernel over every input plane
    let mut host = Tensor3D::new(4, 4, 3);
    kernels.convolution(&mut host, &volume, &k2, 1, 0).unwrap();
    let mut device = Tensor3D::filled_on(4, 4, 3, 0.0, Placement::Device).unwrap();
    kernels.convolution(&mut device, &d_volume, &d_k2, 1, 0).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_3d(device), Precise);

    // every kernel plane over a 2D input
    let mut host = Tensor3D::new(4, 4, 3);
    kernels.convolution(&mut host, &image, &k3, 1, 0).unwrap();
    let mut device = Tensor3D::filled_on(4, 4, 3, 0.0, Placement::Device).unwrap();
    kernels.convolution(&mut device, &d_image, &d_k3, 1, 0).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_3d(device), Precise);
}

#[test]
fn test_pooling_and_upsampling_agree_across_placements() {
    setup();
    let kernels = kernels();
    let input = random_3d(6, 4, 2, -1.0, 1.0, Placement::Host).unwrap();
    let d_input = device_3d(&input);

    let host_pool = kernels.max_pool(&input, 3, 2).unwrap();
    let device_pool = kernels.max_pool(&d_input, 3, 2).unwrap();

    let mut host_dist = Tensor3D::new(6, 4, 2);
    kernels
        .distribute_reverse_max_pool(&mut host_dist, &input, &host_pool, 3, 2)
        .unwrap();
    let mut device_dist = Tensor3D::filled_on(6, 4, 2, 0.0, Placement::Device).unwrap();
    kernels
        .distribute_reverse_max_pool(&mut device_dist, &d_input, &device_pool, 3, 2)
        .unwrap();
    assert_agrees(&host_dist.to_vec().unwrap(), &host_values_3d(device_dist), Precise);
    assert_agrees(&host_pool.to_vec().unwrap(), &host_values_3d(device_pool), Precise);

    let host_up = kernels.nearest_upsample(&input, 2, 2).unwrap();
    let device_up = kernels.nearest_upsample(&d_input, 2, 2).unwrap();

    let mut host_back = Tensor3D::new(6, 4, 2);
    kernels
        .distribute_reverse_nearest_upsample(&mut host_back, &host_up, 2, 2)
        .unwrap();
    let mut device_back = Tensor3D::filled_on(6, 4, 2, 0.0, Placement::Device).unwrap();
    kernels
        .distribute_reverse_nearest_upsample(&mut device_back, &device_up, 2, 2)
        .unwrap();
    assert_agrees(&host_back.to_vec().unwrap(), &host_values_3d(device_back), Partial);
    assert_agrees(&host_up.to_vec().unwrap(), &host_values_3d(device_up), Precise);
}

#[test]
fn test_dropout_on_device_marks_mask() {
    setup();
    let kernels = kernels();
    let input = device_3d(&Tensor3D::filled(4, 4, 2, 1.0));
    let (out, mask) = kernels.dropout_with_mask(&input, 0.5).unwrap();
    assert!(out.is_on_device() && mask.mask().is_on_device());

    let back = mask.backward(&device_3d(&Tensor3D::filled(4, 4, 2, 1.0))).unwrap();
    let out = host_values_3d(out);
    let back = host_values_3d(back);
    let flags = host_values_3d(mask.mask().try_clone().unwrap());
    for ((o, b), m) in out.iter().zip(&back).zip(&flags) {
        assert!(*m == 0.0 || *m == 1.0);
        assert_eq!(*o, 2.0 * m);
        assert_eq!(*b, 2.0 * m);
    }
}

#[test]
fn test_mixed_placement_is_rejected() {
    setup();
    let kernels = kernels();
    let host = tensor2d!([[1.0, 2.0], [3.0, 4.0]]);
    let device = device_2d(&host);

    assert!(matches!(
        kernels.matrix_mult(&host, &device),
        Err(Error::PlacementMismatch)
    ));
    assert!(matches!(
        kernels.convolve(&device, &host, 1, 0),
        Err(Error::PlacementMismatch)
    ));
    let mut sum = host.try_clone().unwrap();
    assert!(matches!(sum.add(&device), Err(Error::PlacementMismatch)));
    let mut grad = Tensor2D::new(2, 2);
    assert!(matches!(
        cross_entropy_gradient(&device, &host, &mut grad),
        Err(Error::PlacementMismatch)
    ));
}

#[test]
fn test_device_watchers() {
    setup();
    let mut volume = device_3d(&Tensor3D::from_fn(2, 2, 2, |r, c, d| (r * 2 + c + 4 * d) as f32));
    {
        let mut plane = volume.watch_depth(1);
        assert!(plane.is_on_device());
        assert!(matches!(plane.to_host(), Err(Error::WatcherPlacement)));
        plane.mult_scalar(10.0).unwrap();
    }
    assert_eq!(
        host_values_3d(volume),
        vec![0.0, 1.0, 2.0, 3.0, 40.0, 50.0, 60.0, 70.0]
    );
}

#[test]
fn test_strided_device_view_is_rejected() {
    setup();
    let matrix = device_2d(&Tensor2D::new(4, 4));
    let strided = matrix.view_window(Window::new(0, 0, 2, 2).skipping(1, 1));
    let dense = device_2d(&Tensor2D::new(2, 2));
    assert!(matches!(
        kernels().matrix_mult(&strided, &dense),
        Err(Error::NonContiguousDevice)
    ));
}

#[test]
fn test_activation_loss_and_optimizers_on_device() {
    setup();
    let values = tensor2d!([[-2.0, -0.5], [0.5, 2.0]]);

    let mut host = values.try_clone().unwrap();
    activate(&mut host, Activation::Sigmoid).unwrap();
    let mut device = device_2d(&values);
    activate(&mut device, Activation::Sigmoid).unwrap();
    assert_agrees(&host.to_vec().unwrap(), &host_values_2d(device), Precise);

    let prediction = tensor2d!([[0.5, 0.25], [0.0, 1.0]]);
    let target = tensor2d!([[1.0, 0.0], [1.0, 1.0]]);
    let mut host_grad = Tensor2D::new(2, 2);
    cross_entropy_gradient(&prediction, &target, &mut host_grad).unwrap();
    let mut device_grad = Tensor2D::filled_on(2, 2, 0.0, Placement::Device).unwrap();
    cross_entropy_gradient(&device_2d(&prediction), &device_2d(&target), &mut device_grad)
        .unwrap();
    assert_agrees(&host_grad.to_vec().unwrap(), &host_values_2d(device_grad), Precise);

    let grads = tensor2d!([[0.1, -0.2], [0.3, -0.4]]);
    let mut host_params = values.try_clone().unwrap();
    sgd_update(&mut host_params, &grads, 0.5).unwrap();
    let d_grads = device_2d(&grads);
    let mut device_params = device_2d(&values);
    sgd_update(&mut device_params, &d_grads, 0.5).unwrap();
    assert_agrees(&host_params.to_vec().unwrap(), &host_values_2d(device_params), Precise);
    assert_eq!(host_values_2d(d_grads), grads.to_vec().unwrap());

    let mut host_adam = AdamMoments::new(4, Placement::Host).unwrap();
    let mut device_adam = AdamMoments::new(4, Placement::Device).unwrap();
    let mut host_params = values.try_clone().unwrap();
    let mut device_params = device_2d(&values);
    let d_grads = device_2d(&grads);
    for _ in 0..3 {
        host_adam.update(&mut host_params, &grads, 0.01).unwrap();
        device_adam.update(&mut device_params, &d_grads, 0.01).unwrap();
    }
    assert_eq!(device_adam.time_step(), 4);
    assert_agrees(&host_params.to_vec().unwrap(), &host_values_2d(device_params), Precise);
}

#[test]
fn test_device_buffers_are_released_on_drop() {
    let emulated = Arc::new(EmulatedAccelerator::new());
    let acc: Arc<dyn Accelerator> = emulated.clone();
    {
        let buffer = DeviceBuffer::filled(&acc, 8, 1.5).unwrap();
        assert_eq!(buffer.len(), 8);
        assert_eq!(emulated.live_buffers(), 1);
    }
    assert_eq!(emulated.live_buffers(), 0);
}
