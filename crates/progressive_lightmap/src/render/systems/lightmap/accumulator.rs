//! Progressive lightmap accumulator
//!
//! Owns the host for its lifetime and drives accumulation cycles through an
//! explicit state machine:
//!
//! ```text
//! Idle -> Preparing -> Accumulating -> Restoring -> Idle
//! ```
//!
//! `recalculate` runs Preparing and leaves the accumulator in Accumulating.
//! Every `poll` renders exactly one step and returns; the return is the point
//! where the host gets its frame back and where cancellation is observed.
//! Leaving a cycle for any reason (completion, cancellation, a failed step, a
//! restart) goes through Restoring, which hands every swapped material,
//! parent and light intensity back to the scene.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{ConfigError, ShadowConfig};
use crate::foundation::math::{vec3_from_array, Vec3};
use crate::render::api::{
    BackendResult, BuiltinProgram, CameraHandle, ClearColor, LightmapHost, MaterialHandle, NodeFlags, NodeHandle,
    NodeKind, SceneNode, ShadowCameraParams, TextureHandle,
};
use crate::render::shader::{uniforms, LightmapProgramBuilder, UniformValue};

use super::cancellation::CancellationToken;
use super::catcher::{OpacityRamp, ShadowCatcher};
use super::edge_blur::EdgeBlurPass;
use super::error::{LightmapError, LightmapResult};
use super::light_ensemble::{EnsembleDescriptor, LightEnsemble, SampleBranch, SamplingParams};
use super::material_swap::{MaterialSwapController, Participant, SwapMaterials};
use super::packing::{pack_charts, AtlasLayout, UvChart};
use super::targets::RenderTargetPair;

/// Accumulator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No cycle running; the scene is untouched
    Idle,
    /// Recording originals and swapping materials
    Preparing,
    /// Rendering one step per poll
    Accumulating,
    /// Handing materials, parents and intensities back
    Restoring,
}

/// State reported by `poll`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleStatus {
    /// More steps to go
    Pending {
        /// Percentage of steps rendered
        progress: u8,
    },
    /// Every step rendered and the scene restored
    Complete,
    /// Cancelled or aborted; the scene was restored
    Cancelled,
}

impl CycleStatus {
    /// Whether the cycle needs more polls
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// Outcome of `register_meshes`
#[derive(Debug, Default)]
pub struct Registration {
    /// Meshes that now receive the lightmap
    pub accepted: Vec<NodeHandle>,
    /// Nodes left out, with the reason
    pub rejected: Vec<(NodeHandle, LightmapError)>,
}

#[derive(Debug)]
struct Cycle {
    token: CancellationToken,
    frames: u32,
    step: u32,
}

/// Progressive shadow lightmap bound to one host scene
pub struct ProgressiveLightmap<H: LightmapHost> {
    host: H,
    config: ShadowConfig,
    scene_root: NodeHandle,
    render_root: NodeHandle,
    private_root: Option<NodeHandle>,
    camera: CameraHandle,

    targets: RenderTargetPair,
    ensemble: LightEnsemble,
    swap: MaterialSwapController,
    accumulation: MaterialHandle,
    discard: MaterialHandle,
    edge_blur: Option<EdgeBlurPass>,
    catcher: Option<ShadowCatcher>,

    receivers: Vec<NodeHandle>,
    occluders: Vec<NodeHandle>,
    scene_lights: Vec<NodeHandle>,
    layout: Option<AtlasLayout>,

    rng: StdRng,
    phase: Phase,
    progress: u8,
    count: u32,
    cycle: Option<Cycle>,
    last_status: CycleStatus,
}

impl<H: LightmapHost> ProgressiveLightmap<H> {
    /// Set up targets, materials and the light ensemble for `scene_root`
    ///
    /// The configuration is validated before the host is touched. On any
    /// error the host is dropped along with the partially built state.
    pub fn new(mut host: H, config: ShadowConfig, scene_root: NodeHandle, camera: CameraHandle) -> LightmapResult<Self> {
        config.validate()?;

        let private_root = config.isolate.then(|| host.create_group());
        let render_root = private_root.unwrap_or(scene_root);

        let targets = RenderTargetPair::allocate(&mut host, config.resolution, config.pixel_format)?;
        targets.clear(&mut host)?;

        let lambert = host.builtin_program(BuiltinProgram::Lambert);
        let accumulation = host.create_material(LightmapProgramBuilder::accumulation(&lambert, config.blend_window)?)?;
        let basic = host.builtin_program(BuiltinProgram::Basic);
        let discard = host.create_material(LightmapProgramBuilder::discard(&basic)?)?;
        let edge_blur = if config.blur_edges {
            Some(EdgeBlurPass::create(&mut host, config.pixel_offset())?)
        } else {
            None
        };

        let ensemble = LightEnsemble::create(
            &mut host,
            render_root,
            &EnsembleDescriptor {
                count: config.light_count,
                total_intensity: config.light_intensity,
                anchor: vec3_from_array(config.light_position),
                shadow: ShadowCameraParams {
                    map_size: config.shadow_map_res,
                    bias: config.shadow_bias,
                    near: config.shadow_near,
                    far: config.shadow_far,
                    half_extent: config.size / 2.0,
                },
                show_helpers: config.show_helpers,
            },
        )?;

        let rng = config.seed.map_or_else(StdRng::from_entropy, StdRng::seed_from_u64);

        log::info!(
            "Progressive lightmap ready: {}x{} {:?}, {} lights, window {}",
            config.resolution,
            config.resolution,
            targets.format(),
            config.light_count,
            config.blend_window
        );

        let mut lightmap = Self {
            host,
            config,
            scene_root,
            render_root,
            private_root,
            camera,
            targets,
            ensemble,
            swap: MaterialSwapController::new(),
            accumulation,
            discard,
            edge_blur,
            catcher: None,
            receivers: Vec::new(),
            occluders: Vec::new(),
            scene_lights: Vec::new(),
            layout: None,
            rng,
            phase: Phase::Idle,
            progress: 0,
            count: 0,
            cycle: None,
            last_status: CycleStatus::Complete,
        };
        lightmap.rescan_scene()?;
        Ok(lightmap)
    }

    /// Register meshes that receive the lightmap
    ///
    /// Non-meshes and meshes without UVs are rejected individually; everything
    /// else becomes a receiver that casts and receives shadows. The atlas is
    /// repacked over all receivers. A running cycle is restored first.
    pub fn register_meshes(&mut self, meshes: &[NodeHandle]) -> LightmapResult<Registration> {
        self.interrupt()?;

        let mut registration = Registration::default();
        for &mesh in meshes {
            match self.check_receiver(mesh) {
                Ok(()) if self.receivers.contains(&mesh) || registration.accepted.contains(&mesh) => {}
                Ok(()) => registration.accepted.push(mesh),
                Err(e) => {
                    log::warn!("Skipping lightmap receiver {mesh:?}: {e}");
                    registration.rejected.push((mesh, e));
                }
            }
        }

        for &mesh in &registration.accepted {
            let flags = self.host.mesh_flags(mesh)?;
            self.host
                .set_mesh_flags(mesh, flags | NodeFlags::CAST_SHADOW | NodeFlags::RECEIVE_SHADOW)?;
        }
        self.receivers.extend_from_slice(&registration.accepted);
        self.occluders.retain(|m| !registration.accepted.contains(m));

        self.repack()?;
        self.sync_participants();
        log::debug!(
            "Registered {} receivers ({} rejected), {} total",
            registration.accepted.len(),
            registration.rejected.len(),
            self.receivers.len()
        );
        Ok(registration)
    }

    fn check_receiver(&self, mesh: NodeHandle) -> LightmapResult<()> {
        if self.host.node_kind(mesh)? != NodeKind::Mesh {
            return Err(LightmapError::NotAMesh(mesh));
        }
        match self.host.mesh_uv_bounds(mesh)? {
            Some(_) => Ok(()),
            None => Err(LightmapError::MissingUv(mesh)),
        }
    }

    fn repack(&mut self) -> LightmapResult<()> {
        let mut charts = Vec::with_capacity(self.receivers.len());
        for &mesh in &self.receivers {
            if let Some(bounds) = self.host.mesh_uv_bounds(mesh)? {
                charts.push(UvChart { mesh, bounds });
            }
        }

        let layout = pack_charts(&charts, self.config.chart_padding());
        for chart in &layout.charts {
            self.host.set_lightmap_uv_transform(chart.mesh, chart.transform)?;
        }
        self.layout = Some(layout);
        Ok(())
    }

    /// Show the lightmap on `mesh` through the soft-shadow material
    ///
    /// The mesh is registered as a receiver. Replaces any previous catcher.
    pub fn attach_catcher(&mut self, mesh: NodeHandle) -> LightmapResult<()> {
        self.interrupt()?;
        if let Some(previous) = self.catcher.take() {
            previous.detach(&mut self.host)?;
        }

        let ramp = OpacityRamp::new(self.config.opacity, self.config.alpha_test, self.config.blend_window);
        let catcher = ShadowCatcher::attach(&mut self.host, mesh, self.config.color, self.config.color_blend, ramp)?;

        let mut registration = self.register_meshes(&[mesh])?;
        if let Some((_, error)) = registration.rejected.pop() {
            catcher.detach(&mut self.host)?;
            return Err(error);
        }

        catcher.bind_map(&mut self.host, self.targets.result_texture())?;
        self.catcher = Some(catcher);
        Ok(())
    }

    /// Reset the estimate
    ///
    /// Zeroes both buffers, rescans the scene for occluders and lights,
    /// hides the catcher and restarts the temporal counter. A running cycle is
    /// restored first.
    pub fn clear(&mut self) -> LightmapResult<()> {
        self.interrupt()?;
        self.targets.clear(&mut self.host)?;
        self.rescan_scene()?;
        if let Some(catcher) = &mut self.catcher {
            catcher.reset(&mut self.host)?;
        }
        self.count = 0;
        log::debug!("Lightmap cleared");
        Ok(())
    }

    fn rescan_scene(&mut self) -> LightmapResult<()> {
        self.occluders.clear();
        self.scene_lights.clear();

        if !self.config.isolate {
            for node in self.host.traverse(self.scene_root)? {
                match node {
                    SceneNode::Mesh(mesh) if !self.receivers.contains(&mesh) => self.occluders.push(mesh),
                    SceneNode::Light(light) if !self.ensemble.contains(light) => self.scene_lights.push(light),
                    _ => {}
                }
            }
        }

        self.sync_participants();
        Ok(())
    }

    fn sync_participants(&mut self) {
        self.swap
            .set_participants(&self.receivers, &self.occluders, &self.scene_lights);
    }

    /// Start a cycle of `frames` steps (the configured count when `None`)
    ///
    /// A cycle already in flight is restored and replaced. The returned token
    /// cancels the new cycle at its next step.
    pub fn recalculate(&mut self, frames: Option<u32>) -> LightmapResult<CancellationToken> {
        let frames = frames.unwrap_or(self.config.frames);
        if frames == 0 {
            return Err(ConfigError::InvalidValue {
                field: "frames",
                reason: "a cycle needs at least one step".to_string(),
            }
            .into());
        }

        if self.cycle.is_some() {
            log::info!("Restarting lightmap accumulation");
            self.interrupt()?;
        }

        self.progress = 0;
        self.begin()?;

        let token = CancellationToken::new();
        self.cycle = Some(Cycle {
            token: token.clone(),
            frames,
            step: 0,
        });
        self.phase = Phase::Accumulating;
        log::info!("Lightmap accumulation started: {frames} steps");
        Ok(token)
    }

    /// Run Preparing; on failure the partial swap is restored
    fn begin(&mut self) -> LightmapResult<()> {
        self.phase = Phase::Preparing;

        let result = self.prepare_scene();
        if let Err(e) = result {
            log::error!("Lightmap preparation failed, restoring scene: {e}");
            if let Err(restore) = self.restore_scene() {
                log::error!("Restoration after failed preparation also failed: {restore}");
            }
            self.progress = 0;
            self.last_status = CycleStatus::Cancelled;
            return Err(e);
        }
        Ok(())
    }

    fn prepare_scene(&mut self) -> LightmapResult<()> {
        if let Some(catcher) = &mut self.catcher {
            catcher.advance(&mut self.host, self.config.temporal)?;
        }
        self.ensemble.set_visible(&mut self.host, true)?;
        self.swap.prepare(
            &mut self.host,
            &SwapMaterials {
                accumulation: self.accumulation,
                discard: self.discard,
                isolation_root: self.private_root,
            },
        )?;
        Ok(())
    }

    /// Restoring: hide the ensemble and hand everything back, then Idle
    fn restore_scene(&mut self) -> LightmapResult<()> {
        self.phase = Phase::Restoring;
        let hidden = self.ensemble.set_visible(&mut self.host, false);
        let restored = self.swap.finish(&mut self.host);
        self.phase = Phase::Idle;
        restored.and(hidden)?;
        Ok(())
    }

    /// Render the next step of the running cycle
    ///
    /// Each call renders exactly one step. Cancellation requested through the
    /// token is honoured before rendering. A failed step aborts the cycle:
    /// the scene is restored and the error returned. Polling while idle
    /// reports how the last cycle ended.
    pub fn poll(&mut self) -> LightmapResult<CycleStatus> {
        let Some(cycle) = &self.cycle else {
            return Ok(self.last_status);
        };

        if cycle.token.is_cancelled() {
            log::info!("Lightmap accumulation cancelled at step {}", cycle.step);
            self.end_cycle(CycleStatus::Cancelled)?;
            return Ok(CycleStatus::Cancelled);
        }

        if let Err(e) = self.render_step(self.camera) {
            log::error!("Lightmap step failed, restoring scene: {e}");
            if let Err(restore) = self.end_cycle(CycleStatus::Cancelled) {
                log::error!("Restoration after failed step also failed: {restore}");
            }
            return Err(e);
        }

        let Some(cycle) = &mut self.cycle else {
            return Ok(self.last_status);
        };
        cycle.step += 1;
        self.progress = percent(cycle.step, cycle.frames);

        if cycle.step >= cycle.frames {
            self.end_cycle(CycleStatus::Complete)?;
            Ok(CycleStatus::Complete)
        } else {
            Ok(CycleStatus::Pending { progress: self.progress })
        }
    }

    fn end_cycle(&mut self, status: CycleStatus) -> LightmapResult<()> {
        self.cycle = None;
        self.last_status = status;
        self.progress = if status == CycleStatus::Complete { 100 } else { 0 };
        let restored = self.restore_scene();
        if status == CycleStatus::Complete {
            log::info!("Lightmap accumulation complete");
        }
        restored
    }

    /// Restore and drop a running cycle, if any
    fn interrupt(&mut self) -> LightmapResult<()> {
        if self.cycle.is_some() || self.phase != Phase::Idle {
            self.end_cycle(CycleStatus::Cancelled)?;
        }
        Ok(())
    }

    /// One accumulation step: resample, blur or clear, blend-render, swap
    fn render_step(&mut self, camera: CameraHandle) -> LightmapResult<()> {
        let params = SamplingParams {
            mode: self.config.sampling,
            ambient_weight: self.config.ambient_weight,
            radius: self.config.light_radius,
            anchor: vec3_from_array(self.config.light_position),
            origin: Vec3::zeros(),
        };
        let samples = self.ensemble.resample(&mut self.rng, &params);
        self.ensemble.apply_positions(&mut self.host)?;
        log::trace!(
            "Resampled {} lights ({} ambient)",
            samples.len(),
            samples.iter().filter(|s| s.branch == SampleBranch::Ambient).count()
        );

        let saved_target = self.host.render_target();
        let drawn = self.draw_step(camera);
        let rebound = self.host.set_render_target(saved_target);
        drawn?;
        rebound?;

        self.targets.swap();
        if let Some(catcher) = &self.catcher {
            catcher.bind_map(&mut self.host, self.targets.result_texture())?;
        }
        Ok(())
    }

    fn draw_step(&mut self, camera: CameraHandle) -> BackendResult<()> {
        let active = self.targets.active();
        let previous = self.targets.previous();
        self.host.set_render_target(Some(active.target))?;

        match &self.edge_blur {
            Some(blur) => blur.draw(&mut self.host, previous.texture)?,
            None => {
                let saved = self.host.clear_color();
                self.host.set_clear_color(ClearColor::TRANSPARENT);
                let cleared = self.host.clear();
                self.host.set_clear_color(saved);
                cleared?;
            }
        }

        self.host.set_uniform(
            self.accumulation,
            uniforms::PREVIOUS_BUFFER,
            UniformValue::Texture(Some(previous.texture)),
        )?;
        self.host.render(self.render_root, camera)
    }

    /// Drive the running cycle to its end
    pub fn run_to_completion(&mut self) -> LightmapResult<CycleStatus> {
        loop {
            let status = self.poll()?;
            if !status.is_pending() {
                return Ok(status);
            }
        }
    }

    /// Cancel the running cycle now
    ///
    /// The scene is restored before this returns. No-op while idle.
    pub fn cancel(&mut self) -> LightmapResult<()> {
        if let Some(cycle) = &self.cycle {
            cycle.token.cancel();
            log::info!("Lightmap accumulation cancelled at step {}", cycle.step);
            self.end_cycle(CycleStatus::Cancelled)?;
        }
        Ok(())
    }

    /// Render one self-contained step from `camera`
    ///
    /// Prepares, renders, restores and advances the catcher ramp and the
    /// temporal counter. Skipped while a cycle is running.
    pub fn update(&mut self, camera: CameraHandle) -> LightmapResult<()> {
        if self.phase != Phase::Idle {
            log::debug!("Lightmap update skipped: cycle in progress");
            return Ok(());
        }

        self.begin()?;
        self.phase = Phase::Accumulating;
        let stepped = self.render_step(camera);
        let restored = self.restore_scene();
        stepped?;
        restored?;

        self.count += 1;
        Ok(())
    }

    /// Per-frame hook
    ///
    /// Advances a running cycle by one step. Otherwise, in temporal mode,
    /// renders one `update` until the temporal budget is spent. Returns
    /// whether a step was rendered.
    pub fn frame(&mut self) -> LightmapResult<bool> {
        if self.cycle.is_some() {
            self.poll()?;
            return Ok(true);
        }
        if self.config.temporal && self.count < self.config.temporal_budget() {
            self.update(self.camera)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Percentage of the current or last cycle rendered
    pub fn progress(&self) -> u8 {
        self.progress
    }

    /// Whether a cycle is in flight
    pub fn is_running(&self) -> bool {
        self.cycle.is_some()
    }

    /// Token of the running cycle
    pub fn cancellation_token(&self) -> Option<CancellationToken> {
        self.cycle.as_ref().map(|c| c.token.clone())
    }

    /// Temporal steps rendered since the last `clear`
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Texture holding the latest completed blend
    pub fn result_texture(&self) -> TextureHandle {
        self.targets.result_texture()
    }

    /// Ping-pong buffers
    pub fn targets(&self) -> &RenderTargetPair {
        &self.targets
    }

    /// Registered receivers and their swap records
    ///
    /// Occluders are swapped too but are not participants; see `occluders`.
    pub fn participants(&self) -> &[Participant] {
        self.swap.participants()
    }

    /// Registered receivers
    pub fn receivers(&self) -> &[NodeHandle] {
        &self.receivers
    }

    /// Scene meshes treated as occluders
    pub fn occluders(&self) -> &[NodeHandle] {
        &self.occluders
    }

    /// Scene lights darkened during accumulation
    pub fn scene_lights(&self) -> &[NodeHandle] {
        &self.scene_lights
    }

    /// Light ensemble
    pub fn ensemble(&self) -> &LightEnsemble {
        &self.ensemble
    }

    /// Shadow catcher, once attached
    pub fn catcher(&self) -> Option<&ShadowCatcher> {
        self.catcher.as_ref()
    }

    /// Current receiver atlas
    pub fn layout(&self) -> Option<&AtlasLayout> {
        self.layout.as_ref()
    }

    /// Root the accumulation pass renders
    pub fn render_root(&self) -> NodeHandle {
        self.render_root
    }

    /// Configuration in use
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    /// Host
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Host, mutably
    ///
    /// Scene edits made while a cycle is in flight are overwritten by
    /// restoration where they touch swapped state.
    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Restore the scene, release every resource and hand the host back
    pub fn dispose(mut self) -> H {
        if let Err(e) = self.interrupt() {
            log::warn!("Restoration during dispose failed: {e}");
        }

        let mut host = self.host;
        let mut released: Vec<BackendResult<()>> = Vec::new();
        if let Some(catcher) = self.catcher {
            released.push(catcher.detach(&mut host));
        }
        if let Some(blur) = self.edge_blur {
            released.push(blur.dispose(&mut host));
        }
        released.push(host.dispose_material(self.accumulation));
        released.push(host.dispose_material(self.discard));
        released.push(self.ensemble.dispose(&mut host));
        if let Some(root) = self.private_root {
            released.push(host.remove_node(root));
        }
        released.push(self.targets.dispose(&mut host));

        for e in released.into_iter().filter_map(Result::err) {
            log::warn!("Lightmap resource release failed: {e}");
        }
        log::debug!("Progressive lightmap disposed");
        host
    }
}

/// `round(100 * step / frames)`
fn percent(step: u32, frames: u32) -> u8 {
    let frames = u64::from(frames.max(1));
    let value = (100 * u64::from(step) + frames / 2) / frames;
    u8::try_from(value.min(100)).unwrap_or(100)
}
