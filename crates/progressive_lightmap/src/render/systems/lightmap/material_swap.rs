//! Material-swap controller
//!
//! During an accumulation pass receivers render with the UV accumulation
//! material, occluders with the discard material and scene lights are dark.
//! Everything touched is recorded first and `finish` walks every record, so
//! the scene comes back exactly as it was however the pass ended.

use crate::render::api::{BackendResult, MaterialHandle, NodeFlags, NodeHandle, SceneHost};
use crate::render::RenderError;

/// How a mesh takes part in accumulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParticipantRole {
    /// Rasterized into the lightmap along its UVs
    Receiver,
    /// Casts shadows only; draws nothing into the lightmap
    Occluder,
}

/// A mesh whose material is swapped during accumulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participant {
    /// Host mesh node
    pub mesh: NodeHandle,
    /// Role in the pass
    pub role: ParticipantRole,
    original_material: Option<MaterialHandle>,
    original_flags: Option<NodeFlags>,
    original_parent: Option<Option<NodeHandle>>,
}

impl Participant {
    fn new(mesh: NodeHandle, role: ParticipantRole) -> Self {
        Self {
            mesh,
            role,
            original_material: None,
            original_flags: None,
            original_parent: None,
        }
    }

    /// Material recorded by the current cycle, if any
    pub fn original_material(&self) -> Option<MaterialHandle> {
        self.original_material
    }
}

/// A scene light darkened during accumulation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneLightRecord {
    /// Host light node
    pub light: NodeHandle,
    base_intensity: Option<f32>,
}

impl SceneLightRecord {
    /// Intensity recorded by the current cycle, if any
    pub fn base_intensity(&self) -> Option<f32> {
        self.base_intensity
    }
}

/// Materials and scope used by `prepare`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapMaterials {
    /// UV accumulation material for receivers
    pub accumulation: MaterialHandle,
    /// Discard material for occluders
    pub discard: MaterialHandle,
    /// Private root receivers are moved into, when isolating
    pub isolation_root: Option<NodeHandle>,
}

/// Records and restores participant materials and light intensities
#[derive(Debug, Default)]
pub struct MaterialSwapController {
    participants: Vec<Participant>,
    occluders: Vec<Participant>,
    lights: Vec<SceneLightRecord>,
    prepared: bool,
}

impl MaterialSwapController {
    /// Create an empty controller
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the receiver, occluder and scene-light sets
    ///
    /// Must only be called while nothing is swapped.
    pub fn set_participants(&mut self, receivers: &[NodeHandle], occluders: &[NodeHandle], lights: &[NodeHandle]) {
        debug_assert!(!self.prepared, "participants replaced while swapped");
        self.participants = receivers
            .iter()
            .map(|&mesh| Participant::new(mesh, ParticipantRole::Receiver))
            .collect();
        self.occluders = occluders
            .iter()
            .map(|&mesh| Participant::new(mesh, ParticipantRole::Occluder))
            .collect();
        self.lights = lights
            .iter()
            .map(|&light| SceneLightRecord {
                light,
                base_intensity: None,
            })
            .collect();
    }

    /// Record originals and swap every participant
    ///
    /// Each entry is recorded before it is modified, so a failure part way
    /// leaves `finish` with exactly the entries that need restoring.
    pub fn prepare<H: SceneHost + ?Sized>(&mut self, host: &mut H, materials: &SwapMaterials) -> BackendResult<()> {
        self.prepared = true;

        for record in &mut self.lights {
            if record.base_intensity.is_none() {
                record.base_intensity = Some(host.light_intensity(record.light)?);
            }
            host.set_light_intensity(record.light, 0.0)?;
        }

        for participant in self.participants.iter_mut().chain(&mut self.occluders) {
            if participant.original_material.is_none() {
                participant.original_material = Some(host.mesh_material(participant.mesh)?);
            }
            if participant.original_flags.is_none() {
                participant.original_flags = Some(host.mesh_flags(participant.mesh)?);
            }

            match participant.role {
                ParticipantRole::Receiver => {
                    if let Some(root) = materials.isolation_root {
                        if participant.original_parent.is_none() {
                            participant.original_parent = Some(host.parent(participant.mesh)?);
                        }
                        host.attach(root, participant.mesh)?;
                    }
                    // UV-space positions make camera culling meaningless
                    if let Some(flags) = participant.original_flags {
                        host.set_mesh_flags(participant.mesh, flags - NodeFlags::FRUSTUM_CULLED)?;
                    }
                    host.set_mesh_material(participant.mesh, materials.accumulation)?;
                }
                ParticipantRole::Occluder => {
                    host.set_mesh_material(participant.mesh, materials.discard)?;
                }
            }
        }

        log::trace!(
            "Swapped {} receivers and {} occluders, darkened {} scene lights",
            self.participants.len(),
            self.occluders.len(),
            self.lights.len()
        );
        Ok(())
    }

    /// Restore every recorded material, flag set, parent and intensity
    ///
    /// Keeps going past individual failures and returns the first one.
    pub fn finish<H: SceneHost + ?Sized>(&mut self, host: &mut H) -> BackendResult<()> {
        let mut first_error: Option<RenderError> = None;
        let mut note = |result: BackendResult<()>| {
            if let Err(e) = result {
                log::warn!("Lightmap restoration step failed: {e}");
                first_error.get_or_insert(e);
            }
        };

        for participant in self.participants.iter_mut().chain(&mut self.occluders) {
            if let Some(parent) = participant.original_parent.take() {
                note(restore_parent(host, participant.mesh, parent));
            }
            if let Some(flags) = participant.original_flags.take() {
                note(host.set_mesh_flags(participant.mesh, flags));
            }
            if let Some(material) = participant.original_material.take() {
                note(host.set_mesh_material(participant.mesh, material));
            }
        }

        for record in &mut self.lights {
            if let Some(intensity) = record.base_intensity.take() {
                note(host.set_light_intensity(record.light, intensity));
            }
        }

        self.prepared = false;
        first_error.map_or(Ok(()), Err)
    }

    /// Whether a `prepare` has not been matched by `finish` yet
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Registered receivers and their swap records
    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    /// Occluders and their swap records
    pub fn occluders(&self) -> &[Participant] {
        &self.occluders
    }

    /// Current scene lights
    pub fn scene_lights(&self) -> &[SceneLightRecord] {
        &self.lights
    }
}

fn restore_parent<H: SceneHost + ?Sized>(host: &mut H, mesh: NodeHandle, parent: Option<NodeHandle>) -> BackendResult<()> {
    match parent {
        Some(parent) => host.attach(parent, mesh),
        None => match host.parent(mesh)? {
            Some(current) => host.remove_child(current, mesh),
            None => Ok(()),
        },
    }
}
