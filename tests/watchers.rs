use ember_ai::{Error, Tensor, Tensor2D, Tensor3D, Window};

#[test]
fn test_depth_slice_writes_reach_parent() {
    let mut volume = Tensor3D::new(3, 3, 4);
    {
        let mut plane = volume.watch_depth(2);
        plane.set_at(1, 2, 7.5).unwrap();
        plane.add_scalar(1.0).unwrap();
    }
    assert_eq!(volume.get_at(1, 2, 2).unwrap(), 8.5);
    assert_eq!(volume.get_at(0, 0, 2).unwrap(), 1.0);
    assert_eq!(volume.get_at(0, 0, 1).unwrap(), 0.0);
}

#[test]
fn test_dropping_watcher_keeps_parent() {
    let mut volume = Tensor3D::filled(2, 2, 2, 3.0);
    let watcher = volume.watch_depth(0);
    drop(watcher);
    assert_eq!(volume.to_vec().unwrap(), vec![3.0; 8]);
}

#[test]
fn test_watcher_reads_parent_values() {
    let volume = Tensor3D::from_fn(2, 2, 3, |r, c, d| (100 * d + 10 * r + c) as f32);
    let plane = volume.view_depth(1);
    assert_eq!(plane.to_vec().unwrap(), vec![100.0, 101.0, 110.0, 111.0]);
    assert!(plane.is_watcher());
}

#[test]
fn test_watcher_placement_is_fixed() {
    let mut volume = Tensor3D::new(2, 2, 2);
    let mut plane = volume.watch_depth(0);
    assert!(matches!(plane.to_device(), Err(Error::WatcherPlacement)));
    assert!(matches!(plane.to_host(), Err(Error::WatcherPlacement)));
}

#[test]
fn test_strided_window_arithmetic_touches_only_selected_cells() {
    let mut m = Tensor2D::new(4, 4);
    m.watch_window(Window::new(0, 0, 2, 2).skipping(1, 1))
        .fill(1.0)
        .unwrap();
    let expected = [
        1.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 0.0, //
        1.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 0.0,
    ];
    assert_eq!(m.to_vec().unwrap(), expected);
}

#[test]
fn test_external_memory_watcher() {
    let mut raw = vec![0.0_f32; 6];
    {
        let mut t = Tensor2D::watch(2, 3, &mut raw);
        t.set_at(1, 1, 2.0).unwrap();
    }
    assert_eq!(raw[4], 2.0);

    let view = Tensor3D::view(1, 3, 2, &raw);
    assert_eq!(view.get_at(0, 1, 1).unwrap(), 2.0);
}

#[test]
fn test_read_only_depth_view_rejects_writes() {
    let volume = Tensor3D::new(1, 1, 2);
    let mut plane = volume.view_depth(1);
    assert!(matches!(plane.fill(1.0), Err(Error::ReadOnlyWatcher)));
}
