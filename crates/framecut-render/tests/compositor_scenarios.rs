use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::{ImageBuffer, Rgba};
use serde_json::{json, Value};

use framecut_core::config::OutputSize;
use framecut_core::plugin::INTERNAL_PLUGIN_ID;
use framecut_core::{Clip, Color, ExecutionMode, FrameCutError, PluginRegistry};
use framecut_render::image_loader::load_picture;
use framecut_render::{Compositor, CpuAccelerator, InternalPlugin};

fn registry(mode: ExecutionMode) -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry
        .init(vec![Box::new(InternalPlugin::new(Arc::new(CpuAccelerator::new(mode))))])
        .expect("internal plugin should register");
    Arc::new(registry)
}

fn scratch_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("framecut_scenario_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).expect("create scratch dir");
    dir
}

fn solid_record(id: &str, layer: u32, start: u32, duration: u32, rgb: [u16; 3]) -> Value {
    json!({
        "Id": id,
        "FromPlugin": INTERNAL_PLUGIN_ID,
        "ClipType": 2,
        "LayerIndex": layer,
        "StartFrame": start,
        "Duration": duration,
        "R": rgb[0],
        "G": rgb[1],
        "B": rgb[2]
    })
}

fn build(registry: &PluginRegistry, records: Vec<Value>) -> Vec<Box<dyn Clip>> {
    records
        .into_iter()
        .map(|record| {
            let mut clip = registry.create_clip(&record).expect("clip should build");
            clip.reinit(registry).expect("clip should initialize");
            clip
        })
        .collect()
}

/// A 4x4 opaque-blue PNG whose alpha channel is 128 everywhere.
fn half_transparent_photo(dir: &Path) -> PathBuf {
    let path = dir.join("photo.png");
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> =
        ImageBuffer::from_pixel(4, 4, Rgba([0, 0, 255, 128]));
    img.save(&path).expect("write photo");
    path
}

fn assert_rgb_near(actual: ([u16; 3], f32), expected: [f32; 3]) {
    for (a, e) in actual.0.iter().zip(expected) {
        assert!(
            (*a as f32 - e).abs() <= 1.0,
            "got {:?}, expected {:?}",
            actual.0,
            expected
        );
    }
}

#[test]
fn test_red_under_half_transparent_photo() {
    let dir = scratch_dir();
    let photo = half_transparent_photo(&dir);
    let registry = registry(ExecutionMode::Concurrent);
    let clips = build(
        &registry,
        vec![
            solid_record("red", 0, 0, 100, [65535, 0, 0]),
            json!({
                "Id": "photo",
                "FromPlugin": INTERNAL_PLUGIN_ID,
                "ClipType": 1,
                "LayerIndex": 1,
                "StartFrame": 0,
                "Duration": 50,
                "FilePath": photo.to_string_lossy()
            }),
        ],
    );
    let compositor = Compositor::new(
        Arc::clone(&registry),
        OutputSize { width: 8, height: 6 },
        Color::BLACK,
        &dir,
    );

    let blended = load_picture(&compositor.render_to_file(&clips, 25).unwrap()).unwrap();
    for y in 0..6 {
        for x in 0..8 {
            assert_rgb_near(blended.get_pixel(x, y).unwrap(), [127.5, 0.0, 127.5]);
        }
    }

    let red = load_picture(&compositor.render_to_file(&clips, 75).unwrap()).unwrap();
    assert!(red.r.iter().all(|&v| v == 255));
    assert!(red.g.iter().chain(red.b.iter()).all(|&v| v == 0));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_swapping_translucent_layers_changes_result() {
    let registry = registry(ExecutionMode::Synchronous);
    let translucent = |id: &str, layer: u32, rgb: [u16; 3]| {
        let mut record = solid_record(id, layer, 0, 10, rgb);
        record["A"] = json!(0.5);
        record
    };
    let render = |red_layer: u32, blue_layer: u32| {
        let clips = build(
            &registry,
            vec![
                solid_record("base", 0, 0, 10, [0, 0, 0]),
                translucent("red", red_layer, [65535, 0, 0]),
                translucent("blue", blue_layer, [0, 0, 65535]),
            ],
        );
        Compositor::new(
            Arc::clone(&registry),
            OutputSize { width: 2, height: 2 },
            Color::BLACK,
            std::env::temp_dir(),
        )
        .render_frame(&clips, 5)
        .unwrap()
    };

    let blue_on_top = render(1, 2);
    let red_on_top = render(2, 1);
    assert_ne!(blue_on_top, red_on_top);
    let (top_blue, _) = blue_on_top.get_pixel(0, 0).unwrap();
    assert!(top_blue[2] > top_blue[0]);
    let (top_red, _) = red_on_top.get_pixel(0, 0).unwrap();
    assert!(top_red[0] > top_red[2]);
}

#[test]
fn test_effect_chain_runs_before_mixture() {
    let registry = registry(ExecutionMode::Concurrent);
    let mut top = solid_record("top", 1, 0, 10, [0, 65535, 0]);
    top["Effects"] = json!([
        { "Type": "ReplaceAlpha", "Index": 1, "Arguments": { "Alpha": 0.5 } },
        { "Type": "RemoveColor", "Index": 0, "Arguments": { "R": 0, "G": 65535, "B": 0 } },
        { "Type": "ReplaceAlpha", "Enabled": false, "Arguments": { "Alpha": 0.0 } }
    ]);
    let clips = build(
        &registry,
        vec![solid_record("bottom", 0, 0, 10, [65535, 0, 0]), top],
    );
    let out = Compositor::new(
        Arc::clone(&registry),
        OutputSize { width: 2, height: 2 },
        Color::BLACK,
        std::env::temp_dir(),
    )
    .render_frame(&clips, 0)
    .unwrap();
    // RemoveColor runs first and blackens the green, then ReplaceAlpha
    // brings the black back at half strength.
    assert_eq!(out.get_pixel(1, 1), Some(([32767, 0, 0], 1.0)));
}

#[test]
fn test_layer_conflict_fails_render() {
    let registry = registry(ExecutionMode::Concurrent);
    let clips = build(
        &registry,
        vec![
            solid_record("a", 4, 0, 10, [1, 1, 1]),
            solid_record("b", 4, 10, 10, [2, 2, 2]),
        ],
    );
    let compositor = Compositor::new(
        registry,
        OutputSize { width: 2, height: 2 },
        Color::BLACK,
        std::env::temp_dir(),
    );
    // Inclusive ranges make frame 10 shared by both clips.
    let err = compositor.render_to_file(&clips, 10).unwrap_err();
    assert!(matches!(err, FrameCutError::OverlappingLayers { layer: 4, frame: 10, .. }));
    assert!(compositor.render_frame(&clips, 11).is_ok());
}

#[test]
fn test_render_reuses_file_within_clip_set() {
    let dir = scratch_dir();
    let registry = registry(ExecutionMode::Concurrent);
    let clips = build(
        &registry,
        vec![
            solid_record("a", 0, 0, 10, [100, 200, 300]),
            solid_record("b", 1, 0, 10, [65535, 65535, 0]),
        ],
    );
    let compositor = Compositor::new(
        Arc::clone(&registry),
        OutputSize { width: 16, height: 9 },
        Color::BLACK,
        &dir,
    );

    let first = compositor.render_to_file(&clips, 3).unwrap();
    let first_bytes = std::fs::read(&first).unwrap();
    let second = compositor.render_to_file(&clips, 3).unwrap();
    assert_eq!(first, second);
    assert_eq!(first_bytes, std::fs::read(&second).unwrap());
    assert!(first
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with("framecut_render_") && n.ends_with(".png")));

    let other = compositor.render_to_file(&clips, 4).unwrap();
    assert_ne!(first, other);

    let empty = compositor.render_to_file(&clips, 50).unwrap();
    assert!(empty.ends_with("framecut_render_nullframe.png"));

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn test_composite_is_deterministic() {
    let registry = registry(ExecutionMode::Concurrent);
    let mut top = solid_record("top", 1, 0, 10, [12000, 50000, 700]);
    top["A"] = json!(0.37);
    let clips = build(
        &registry,
        vec![solid_record("bottom", 0, 0, 10, [65535, 20000, 3000]), top],
    );
    let compositor = Compositor::new(
        Arc::clone(&registry),
        OutputSize { width: 64, height: 64 },
        Color::BLACK,
        std::env::temp_dir(),
    );
    let first = compositor.render_frame(&clips, 2).unwrap();
    let second = compositor.render_frame(&clips, 2).unwrap();
    assert_eq!(first, second);
    let (rgb, _) = first.get_pixel(10, 10).unwrap();
    assert!(rgb[0] < 65535 && rgb[1] > 20000);
}

#[test]
fn test_edited_photo_is_rendered_fresh_for_new_clip_set() {
    let dir = scratch_dir();
    let photo = dir.join("swap.png");
    let write_photo = |rgb: [u8; 3]| {
        ImageBuffer::<Rgba<u8>, Vec<u8>>::from_pixel(4, 4, Rgba([rgb[0], rgb[1], rgb[2], 255]))
            .save(&photo)
            .expect("write photo");
    };
    let record = json!({
        "Id": "photo",
        "FromPlugin": INTERNAL_PLUGIN_ID,
        "ClipType": 1,
        "LayerIndex": 0,
        "StartFrame": 0,
        "Duration": 10,
        "FilePath": photo.to_string_lossy()
    });
    let registry = registry(ExecutionMode::Concurrent);
    let mut compositor = Compositor::new(
        Arc::clone(&registry),
        OutputSize { width: 4, height: 4 },
        Color::BLACK,
        &dir,
    );

    write_photo([255, 0, 0]);
    let clips = build(&registry, vec![record.clone()]);
    let red = compositor.render_to_file(&clips, 3).unwrap();
    assert_eq!(load_picture(&red).unwrap().get_pixel(0, 0), Some(([255, 0, 0], 1.0)));

    write_photo([0, 0, 255]);
    let clips = build(&registry, vec![record]);
    compositor.begin_clip_set();
    let blue = compositor.render_to_file(&clips, 3).unwrap();
    assert_ne!(red, blue);
    assert_eq!(load_picture(&blue).unwrap().get_pixel(0, 0), Some(([0, 0, 255], 1.0)));

    std::fs::remove_dir_all(&dir).ok();
}
