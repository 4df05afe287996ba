//! Accumulation scenarios against the headless host

use super::blend::converged_value;
use super::*;
use crate::config::{ConfigError, ShadowConfig};
use crate::foundation::math::Vec2;
use crate::render::api::{
    CameraHandle, MaterialHandle, MeshUvBounds, NodeFlags, NodeHandle, PixelFormat, RenderHost, SceneHost,
};
use crate::render::backends::headless::{DrawKind, DrawRecord, HeadlessHost};
use crate::render::RenderError;
use approx::assert_abs_diff_eq;

#[derive(Debug, Clone, Copy)]
struct Handles {
    root: NodeHandle,
    camera: CameraHandle,
    ground: NodeHandle,
    crate_mesh: NodeHandle,
    uvless: NodeHandle,
    lamp: NodeHandle,
}

/// Two UV meshes, one mesh without UVs and a scene light
fn scene() -> (HeadlessHost, Handles) {
    let mut host = HeadlessHost::new();
    let root = host.create_group();
    let camera = host.create_camera();
    let ground = host.create_mesh(Some(MeshUvBounds::unit()));
    let crate_mesh = host.create_mesh(Some(MeshUvBounds::new(Vec2::zeros(), Vec2::new(1.0, 0.5))));
    let uvless = host.create_mesh(None);
    let lamp = host.create_point_light(0.8);
    for node in [ground, crate_mesh, uvless, lamp] {
        host.add_child(root, node).unwrap();
    }
    (
        host,
        Handles {
            root,
            camera,
            ground,
            crate_mesh,
            uvless,
            lamp,
        },
    )
}

fn small_config() -> ShadowConfig {
    ShadowConfig::new(32)
        .with_light_count(4)
        .with_frames(10)
        .with_blend_window(10.0)
        .with_seed(7)
}

fn fixture(config: ShadowConfig) -> (ProgressiveLightmap<HeadlessHost>, Handles) {
    let (host, h) = scene();
    let mut lightmap = ProgressiveLightmap::new(host, config, h.root, h.camera).unwrap();
    lightmap.attach_catcher(h.ground).unwrap();
    lightmap.clear().unwrap();
    (lightmap, h)
}

#[derive(Debug, PartialEq)]
struct SceneState {
    materials: Vec<MaterialHandle>,
    flags: Vec<NodeFlags>,
    parents: Vec<Option<NodeHandle>>,
    lamp_bits: u32,
}

fn scene_state(host: &HeadlessHost, h: &Handles) -> SceneState {
    let meshes = [h.ground, h.crate_mesh, h.uvless];
    SceneState {
        materials: meshes.iter().map(|&m| host.mesh_material(m).unwrap()).collect(),
        flags: meshes.iter().map(|&m| host.mesh_flags(m).unwrap()).collect(),
        parents: meshes.iter().map(|&m| host.parent(m).unwrap()).collect(),
        lamp_bits: host.light_intensity(h.lamp).unwrap().to_bits(),
    }
}

fn scene_draws(host: &HeadlessHost) -> Vec<DrawRecord> {
    host.draw_log()
        .iter()
        .filter(|d| matches!(d.kind, DrawKind::Scene { .. }))
        .cloned()
        .collect()
}

/// Value at the centre of a receiver's chart
fn chart_centre(lightmap: &ProgressiveLightmap<HeadlessHost>, mesh: NodeHandle) -> f32 {
    let host = lightmap.host();
    let bounds = host.mesh_uv_bounds(mesh).unwrap().unwrap();
    let uv = host
        .lightmap_uv_transform(mesh)
        .unwrap()
        .apply((bounds.min + bounds.max) / 2.0);
    host.sample(lightmap.result_texture(), uv).unwrap()[0]
}

#[test]
fn test_ping_pong_never_reads_the_written_buffer() {
    for steps in [1_u32, 2, 5, 8] {
        let (mut lightmap, _) = fixture(small_config());
        lightmap.host_mut().clear_draw_log();

        lightmap.recalculate(Some(steps)).unwrap();
        assert_eq!(lightmap.run_to_completion().unwrap(), CycleStatus::Complete);

        let draws = scene_draws(lightmap.host());
        assert_eq!(draws.len(), steps as usize);
        for draw in &draws {
            let written = draw.target.unwrap();
            assert_eq!(draw.sampled.len(), 1);
            assert_ne!(draw.sampled[0], written);
        }
        for pair in draws.windows(2) {
            assert_eq!(pair[1].sampled[0], pair[0].target.unwrap());
        }

        let last = draws.last().unwrap().target;
        assert_eq!(lightmap.host().texture_target(lightmap.result_texture()), last);
        assert_eq!(lightmap.targets().active_is_a(), steps % 2 == 0);
    }
}

#[test]
fn test_edge_blur_runs_before_each_accumulation_draw() {
    let (mut lightmap, _) = fixture(small_config());
    lightmap.host_mut().clear_draw_log();
    lightmap.recalculate(Some(3)).unwrap();
    lightmap.run_to_completion().unwrap();

    let log = lightmap.host().draw_log();
    assert_eq!(log.len(), 6);
    for pair in log.chunks(2) {
        assert!(matches!(pair[0].kind, DrawKind::Fullscreen { .. }));
        assert!(matches!(pair[1].kind, DrawKind::Scene { .. }));
        assert_eq!(pair[0].target, pair[1].target);
        assert_eq!(pair[0].sampled, pair[1].sampled);
    }
}

#[test]
fn test_disabled_blur_skips_fullscreen_pass() {
    let (mut lightmap, _) = fixture(small_config().with_blur_edges(false));
    lightmap.host_mut().clear_draw_log();
    lightmap.recalculate(Some(3)).unwrap();
    lightmap.run_to_completion().unwrap();

    assert!(lightmap
        .host()
        .draw_log()
        .iter()
        .all(|d| matches!(d.kind, DrawKind::Scene { .. })));
}

#[test]
fn test_restoration_after_every_step_count() {
    for polls in 0..=4 {
        let (mut lightmap, h) = fixture(small_config());
        let before = scene_state(lightmap.host(), &h);

        lightmap.recalculate(Some(4)).unwrap();
        assert_eq!(lightmap.phase(), Phase::Accumulating);
        assert_ne!(lightmap.host().mesh_material(h.ground).unwrap(), before.materials[0]);
        assert_ne!(lightmap.host().mesh_material(h.uvless).unwrap(), before.materials[2]);
        assert_eq!(lightmap.host().light_intensity(h.lamp).unwrap(), 0.0);

        for _ in 0..polls {
            lightmap.poll().unwrap();
        }
        lightmap.cancel().unwrap();

        assert_eq!(lightmap.phase(), Phase::Idle);
        assert_eq!(scene_state(lightmap.host(), &h), before, "after {polls} polls");
        assert!(!lightmap.host().is_visible(lightmap.ensemble().group()).unwrap());
    }
}

#[test]
fn test_blend_converges_through_pipeline() {
    for window in [1.0_f32, 10.0, 100.0] {
        let config = small_config().with_blend_window(window).with_blur_edges(false);
        let (mut lightmap, h) = fixture(config);

        lightmap.recalculate(Some(1)).unwrap();
        lightmap.run_to_completion().unwrap();
        assert_abs_diff_eq!(chart_centre(&lightmap, h.ground), converged_value(1.0, window, 1), epsilon = 1e-4);

        // buffers are not cleared between cycles, so the estimate keeps converging
        lightmap.recalculate(Some(49)).unwrap();
        lightmap.run_to_completion().unwrap();
        assert_abs_diff_eq!(chart_centre(&lightmap, h.ground), converged_value(1.0, window, 50), epsilon = 1e-4);
    }
}

#[test]
fn test_cancel_at_step_37_of_100() {
    let (mut lightmap, h) = fixture(small_config());
    let before = scene_state(lightmap.host(), &h);

    let token = lightmap.recalculate(Some(100)).unwrap();
    for step in 1..=37_u8 {
        assert_eq!(lightmap.poll().unwrap(), CycleStatus::Pending { progress: step });
    }
    assert_eq!(lightmap.progress(), 37);

    token.cancel();
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Cancelled);
    assert_eq!(lightmap.phase(), Phase::Idle);
    assert_eq!(lightmap.progress(), 0);
    assert_eq!(scene_state(lightmap.host(), &h), before);
    assert!(!lightmap.is_running());
}

#[test]
fn test_end_to_end_cycle() {
    let (host, h) = scene();
    let config = ShadowConfig::new(256)
        .with_light_count(8)
        .with_frames(50)
        .with_blend_window(50.0)
        .with_seed(2024);
    let mut lightmap = ProgressiveLightmap::new(host, config, h.root, h.camera).unwrap();

    let registration = lightmap.register_meshes(&[h.ground, h.crate_mesh, h.uvless]).unwrap();
    assert_eq!(registration.accepted, vec![h.ground, h.crate_mesh]);
    assert_eq!(registration.rejected.len(), 1);
    assert!(matches!(registration.rejected[0], (mesh, LightmapError::MissingUv(_)) if mesh == h.uvless));
    assert_eq!(lightmap.occluders(), &[h.uvless]);
    assert_eq!(lightmap.scene_lights(), &[h.lamp]);

    lightmap.clear().unwrap();
    let participants: Vec<NodeHandle> = lightmap.participants().iter().map(|p| p.mesh).collect();
    assert_eq!(participants, vec![h.ground, h.crate_mesh]);
    assert!(!lightmap.participants().iter().any(|p| p.mesh == h.uvless));
    assert!(lightmap
        .participants()
        .iter()
        .all(|p| p.role == ParticipantRole::Receiver));
    let before = scene_state(lightmap.host(), &h);
    lightmap.host_mut().clear_draw_log();

    lightmap.recalculate(Some(50)).unwrap();
    let mut polls = 0;
    let mut last_progress = 0;
    loop {
        polls += 1;
        match lightmap.poll().unwrap() {
            CycleStatus::Pending { progress } => {
                assert!(progress >= last_progress);
                last_progress = progress;
            }
            status => {
                assert_eq!(status, CycleStatus::Complete);
                break;
            }
        }
    }

    assert_eq!(polls, 50);
    assert_eq!(lightmap.progress(), 100);
    assert_eq!(lightmap.phase(), Phase::Idle);
    assert_eq!(scene_state(lightmap.host(), &h), before);
    assert_eq!(scene_draws(lightmap.host()).len(), 50);

    let expected = converged_value(1.0, 50.0, 50);
    for mesh in [h.ground, h.crate_mesh] {
        assert_abs_diff_eq!(chart_centre(&lightmap, mesh), expected, epsilon = 1e-3);
    }

    let layout = lightmap.layout().unwrap();
    assert_eq!(layout.charts.len(), 2);
}

#[test]
fn test_render_failure_restores_and_surfaces() {
    let (mut lightmap, h) = fixture(small_config());
    let before = scene_state(lightmap.host(), &h);
    lightmap.host_mut().fail_render_after(3);

    lightmap.recalculate(Some(10)).unwrap();
    for _ in 0..3 {
        assert!(lightmap.poll().unwrap().is_pending());
    }
    let err = lightmap.poll().unwrap_err();
    assert!(matches!(err, LightmapError::Render(RenderError::RenderingFailed(_))));

    assert_eq!(lightmap.phase(), Phase::Idle);
    assert_eq!(lightmap.progress(), 0);
    assert_eq!(scene_state(lightmap.host(), &h), before);
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Cancelled);
    assert_eq!(lightmap.host().render_target(), None);
}

#[test]
fn test_failed_preparation_restores_swapped_entries() {
    let (mut lightmap, h) = fixture(small_config());
    lightmap.register_meshes(&[h.crate_mesh]).unwrap();
    let ground_material = lightmap.host().mesh_material(h.ground).unwrap();
    let ground_flags = lightmap.host().mesh_flags(h.ground).unwrap();
    lightmap.host_mut().remove_node(h.crate_mesh).unwrap();

    let err = lightmap.recalculate(Some(5)).unwrap_err();
    assert!(matches!(err, LightmapError::Render(RenderError::InvalidHandle { .. })));

    assert_eq!(lightmap.phase(), Phase::Idle);
    assert!(!lightmap.is_running());
    assert_eq!(lightmap.progress(), 0);
    assert_eq!(lightmap.host().mesh_material(h.ground).unwrap(), ground_material);
    assert_eq!(lightmap.host().mesh_flags(h.ground).unwrap(), ground_flags);
    assert_eq!(lightmap.host().light_intensity(h.lamp).unwrap(), 0.8);
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Cancelled);
}

#[test]
fn test_failed_restoration_after_failed_preparation() {
    let (mut lightmap, h) = fixture(small_config());
    let before = scene_state(lightmap.host(), &h);
    let group = lightmap.ensemble().group();
    lightmap.host_mut().remove_node(group).unwrap();

    // showing and hiding the ensemble both fail; the preparation error surfaces
    let err = lightmap.recalculate(Some(5)).unwrap_err();
    assert!(matches!(
        err,
        LightmapError::Render(RenderError::InvalidHandle { kind: "node", .. })
    ));

    assert_eq!(lightmap.phase(), Phase::Idle);
    assert!(!lightmap.is_running());
    assert_eq!(lightmap.progress(), 0);
    assert_eq!(scene_state(lightmap.host(), &h), before);
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Cancelled);
}

#[test]
fn test_recalculate_while_running_restarts() {
    let (mut lightmap, h) = fixture(small_config());
    let before = scene_state(lightmap.host(), &h);

    let first = lightmap.recalculate(Some(10)).unwrap();
    for _ in 0..3 {
        lightmap.poll().unwrap();
    }
    let second = lightmap.recalculate(Some(5)).unwrap();
    assert!(!first.same_cycle(&second));
    assert_eq!(lightmap.progress(), 0);

    first.cancel();
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Pending { progress: 20 });
    assert_eq!(lightmap.run_to_completion().unwrap(), CycleStatus::Complete);
    assert_eq!(scene_state(lightmap.host(), &h), before);
}

#[test]
fn test_progress_held_until_next_cycle() {
    let (mut lightmap, _) = fixture(small_config());
    lightmap.recalculate(Some(4)).unwrap();
    lightmap.run_to_completion().unwrap();
    assert_eq!(lightmap.progress(), 100);
    assert_eq!(lightmap.poll().unwrap(), CycleStatus::Complete);

    lightmap.recalculate(Some(4)).unwrap();
    assert_eq!(lightmap.progress(), 0);
}

#[test]
fn test_isolation_reparents_receivers_only() {
    let (mut lightmap, h) = fixture(small_config().with_isolation(true));
    let before = scene_state(lightmap.host(), &h);
    assert_ne!(lightmap.render_root(), h.root);
    assert!(lightmap.occluders().is_empty());
    assert!(lightmap.scene_lights().is_empty());

    lightmap.recalculate(Some(5)).unwrap();
    assert_eq!(lightmap.host().parent(h.ground).unwrap(), Some(lightmap.render_root()));
    assert_eq!(lightmap.host().light_intensity(h.lamp).unwrap(), 0.8);
    assert_eq!(lightmap.host().mesh_material(h.crate_mesh).unwrap(), before.materials[1]);

    lightmap.poll().unwrap();
    lightmap.cancel().unwrap();
    assert_eq!(scene_state(lightmap.host(), &h), before);
}

#[test]
fn test_temporal_frames_stop_at_limit() {
    let config = small_config().with_temporal(true).with_limit(4);
    let (mut lightmap, _) = fixture(config);

    for _ in 0..4 {
        assert!(lightmap.frame().unwrap());
        assert_eq!(lightmap.phase(), Phase::Idle);
    }
    assert!(!lightmap.frame().unwrap());
    assert_eq!(lightmap.count(), 4);

    let ramp = lightmap.catcher().unwrap().ramp();
    assert_abs_diff_eq!(ramp.opacity(), 0.4, epsilon = 1e-6);

    lightmap.clear().unwrap();
    assert_eq!(lightmap.count(), 0);
    assert_eq!(lightmap.catcher().unwrap().ramp().opacity(), 0.0);
}

#[test]
fn test_frame_polls_running_cycle() {
    let (mut lightmap, h) = fixture(small_config());
    lightmap.recalculate(Some(2)).unwrap();

    assert!(lightmap.frame().unwrap());
    assert_eq!(lightmap.progress(), 50);

    lightmap.update(h.camera).unwrap();
    assert_eq!(lightmap.count(), 0);

    assert!(lightmap.frame().unwrap());
    assert!(!lightmap.is_running());
    assert!(!lightmap.frame().unwrap());
}

#[test]
fn test_catcher_shows_latest_result() {
    let (mut lightmap, h) = fixture(small_config());
    lightmap.recalculate(Some(3)).unwrap();
    lightmap.run_to_completion().unwrap();

    let catcher = lightmap.catcher().unwrap();
    assert_eq!(catcher.mesh(), h.ground);
    let program = lightmap.host().material_program(catcher.material()).unwrap();
    assert_eq!(
        program.uniforms.texture(crate::render::shader::uniforms::MAP),
        Some(lightmap.result_texture())
    );
    assert_eq!(catcher.params().opacity, 1.0);
}

#[test]
fn test_registration_rejects_non_meshes() {
    let (mut lightmap, h) = fixture(small_config());
    let registration = lightmap.register_meshes(&[h.lamp, h.root]).unwrap();

    assert!(registration.accepted.is_empty());
    assert!(registration
        .rejected
        .iter()
        .all(|(_, e)| matches!(e, LightmapError::NotAMesh(_))));
}

#[test]
fn test_receivers_cast_and_receive_shadows() {
    let (mut lightmap, h) = fixture(small_config());
    lightmap.register_meshes(&[h.crate_mesh]).unwrap();

    for mesh in [h.ground, h.crate_mesh] {
        let flags = lightmap.host().mesh_flags(mesh).unwrap();
        assert!(flags.contains(NodeFlags::CAST_SHADOW | NodeFlags::RECEIVE_SHADOW));
    }
    assert_eq!(lightmap.receivers(), &[h.ground, h.crate_mesh]);
}

#[test]
fn test_invalid_configuration_rejected() {
    let (host, h) = scene();
    let result = ProgressiveLightmap::new(host, ShadowConfig::new(0), h.root, h.camera);
    assert!(matches!(
        result,
        Err(LightmapError::InvalidConfiguration(ConfigError::InvalidValue { field: "resolution", .. }))
    ));

    let (mut lightmap, _) = fixture(small_config());
    assert!(matches!(
        lightmap.recalculate(Some(0)),
        Err(LightmapError::InvalidConfiguration(_))
    ));
}

#[test]
fn test_half_float_fallback() {
    let (mut host, h) = scene();
    host.set_supported_formats(&[PixelFormat::Rgba16Float]);
    let lightmap = ProgressiveLightmap::new(host, small_config(), h.root, h.camera).unwrap();
    assert_eq!(lightmap.targets().format(), PixelFormat::Rgba16Float);
}

#[test]
fn test_dispose_releases_everything() {
    let (host, h) = scene();
    let materials = host.material_count();
    let mut lightmap = ProgressiveLightmap::new(host, small_config(), h.root, h.camera).unwrap();
    lightmap.attach_catcher(h.ground).unwrap();
    let group = lightmap.ensemble().group();

    lightmap.recalculate(None).unwrap();
    lightmap.poll().unwrap();
    let host = lightmap.dispose();

    assert_eq!(host.material_count(), materials);
    assert_eq!(host.target_count(), 0);
    assert!(host.node_kind(group).is_err());
    assert_eq!(host.light_intensity(h.lamp).unwrap(), 0.8);
    assert_eq!(host.traverse(h.root).unwrap().len(), 5);
}
