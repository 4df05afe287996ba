//! Scene graph of the headless host

use super::{HeadlessHost, LightData, NodeData};
use crate::foundation::collections::key_from_raw;
use crate::foundation::math::Vec3;
use crate::render::api::{
    BackendResult, DirectionalLightDescriptor, MaterialHandle, MeshUvBounds, NodeFlags, NodeHandle, NodeKind,
    SceneHost, SceneNode, UvTransform,
};
use crate::render::RenderError;

impl HeadlessHost {
    fn is_ancestor(&self, ancestor: NodeHandle, node: NodeHandle) -> bool {
        let mut current = Some(node);
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            current = self.node(handle).ok().and_then(|n| n.parent);
        }
        false
    }

    fn detach(&mut self, child: NodeHandle) -> BackendResult<()> {
        if let Some(parent) = self.node_mut(child)?.parent.take() {
            if let Ok(parent) = self.node_mut(parent) {
                parent.children.retain(|&c| c != child);
            }
        }
        Ok(())
    }

    /// Visible nodes below `root`, skipping hidden subtrees
    pub(super) fn visible_nodes(&self, root: NodeHandle) -> BackendResult<Vec<SceneNode>> {
        let mut visited = Vec::new();
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            let node = self.node(handle)?;
            if !node.visible {
                continue;
            }
            visited.push(tag(handle, &node.data));
            stack.extend(node.children.iter().rev());
        }
        Ok(visited)
    }
}

fn tag(handle: NodeHandle, data: &NodeData) -> SceneNode {
    match data {
        NodeData::Group => SceneNode::Group(handle),
        NodeData::Mesh(_) => SceneNode::Mesh(handle),
        NodeData::Light(_) => SceneNode::Light(handle),
    }
}

impl SceneHost for HeadlessHost {
    fn create_group(&mut self) -> NodeHandle {
        self.insert_node(NodeData::Group)
    }

    fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()> {
        self.node(parent)?;
        self.node(child)?;
        if self.is_ancestor(child, parent) {
            return Err(RenderError::BackendError(format!(
                "node {:#x} cannot become a descendant of itself",
                child.0
            )));
        }

        self.detach(child)?;
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        Ok(())
    }

    fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()> {
        if self.node(child)?.parent != Some(parent) {
            return Err(RenderError::BackendError(format!(
                "node {:#x} is not a child of {:#x}",
                child.0, parent.0
            )));
        }
        self.detach(child)
    }

    fn attach(&mut self, parent: NodeHandle, child: NodeHandle) -> BackendResult<()> {
        // no transforms, so reparenting already preserves world placement
        self.add_child(parent, child)
    }

    fn parent(&self, node: NodeHandle) -> BackendResult<Option<NodeHandle>> {
        Ok(self.node(node)?.parent)
    }

    fn remove_node(&mut self, node: NodeHandle) -> BackendResult<()> {
        self.detach(node)?;
        let mut stack = vec![node];
        while let Some(handle) = stack.pop() {
            if let Some(removed) = self.nodes.remove(key_from_raw(handle.0)) {
                stack.extend(removed.children);
            }
        }
        Ok(())
    }

    fn traverse(&self, root: NodeHandle) -> BackendResult<Vec<SceneNode>> {
        let mut visited = Vec::new();
        let mut stack = vec![root];
        while let Some(handle) = stack.pop() {
            let node = self.node(handle)?;
            visited.push(tag(handle, &node.data));
            stack.extend(node.children.iter().rev());
        }
        Ok(visited)
    }

    fn node_kind(&self, node: NodeHandle) -> BackendResult<NodeKind> {
        Ok(tag(node, &self.node(node)?.data).kind())
    }

    fn set_visible(&mut self, node: NodeHandle, visible: bool) -> BackendResult<()> {
        self.node_mut(node)?.visible = visible;
        Ok(())
    }

    fn mesh_material(&self, mesh: NodeHandle) -> BackendResult<MaterialHandle> {
        Ok(self.mesh(mesh)?.material)
    }

    fn set_mesh_material(&mut self, mesh: NodeHandle, material: MaterialHandle) -> BackendResult<()> {
        self.material(material)?;
        self.mesh_mut(mesh)?.material = material;
        Ok(())
    }

    fn mesh_flags(&self, mesh: NodeHandle) -> BackendResult<NodeFlags> {
        Ok(self.mesh(mesh)?.flags)
    }

    fn set_mesh_flags(&mut self, mesh: NodeHandle, flags: NodeFlags) -> BackendResult<()> {
        self.mesh_mut(mesh)?.flags = flags;
        Ok(())
    }

    fn mesh_uv_bounds(&self, mesh: NodeHandle) -> BackendResult<Option<MeshUvBounds>> {
        Ok(self.mesh(mesh)?.uv_bounds)
    }

    fn set_lightmap_uv_transform(&mut self, mesh: NodeHandle, transform: UvTransform) -> BackendResult<()> {
        self.mesh_mut(mesh)?.lightmap_uv = transform;
        Ok(())
    }

    fn create_directional_light(&mut self, desc: &DirectionalLightDescriptor) -> BackendResult<NodeHandle> {
        Ok(self.insert_node(NodeData::Light(LightData {
            intensity: desc.intensity,
            position: desc.position,
            shadow: Some(desc.shadow),
            helper_visible: false,
        })))
    }

    fn light_intensity(&self, light: NodeHandle) -> BackendResult<f32> {
        Ok(self.light(light)?.intensity)
    }

    fn set_light_intensity(&mut self, light: NodeHandle, intensity: f32) -> BackendResult<()> {
        self.light_mut(light)?.intensity = intensity;
        Ok(())
    }

    fn set_light_position(&mut self, light: NodeHandle, position: Vec3) -> BackendResult<()> {
        self.light_mut(light)?.position = position;
        Ok(())
    }

    fn set_helper_visible(&mut self, light: NodeHandle, visible: bool) -> BackendResult<()> {
        self.light_mut(light)?.helper_visible = visible;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (HeadlessHost, NodeHandle, NodeHandle, NodeHandle) {
        let mut host = HeadlessHost::new();
        let root = host.create_group();
        let group = host.create_group();
        let mesh = host.create_mesh(None);
        host.add_child(root, group).unwrap();
        host.add_child(group, mesh).unwrap();
        (host, root, group, mesh)
    }

    #[test]
    fn test_traverse_is_depth_first_with_root() {
        let (mut host, root, group, mesh) = tree();
        let light = host.create_point_light(1.0);
        host.add_child(root, light).unwrap();

        let nodes = host.traverse(root).unwrap();
        assert_eq!(
            nodes,
            vec![
                SceneNode::Group(root),
                SceneNode::Group(group),
                SceneNode::Mesh(mesh),
                SceneNode::Light(light),
            ]
        );
    }

    #[test]
    fn test_visible_nodes_skip_hidden_subtrees() {
        let (mut host, root, group, _) = tree();
        host.set_visible(group, false).unwrap();
        assert_eq!(host.visible_nodes(root).unwrap(), vec![SceneNode::Group(root)]);
    }

    #[test]
    fn test_add_child_reparents() {
        let (mut host, root, group, mesh) = tree();
        host.add_child(root, mesh).unwrap();

        assert_eq!(host.parent(mesh).unwrap(), Some(root));
        assert_eq!(host.traverse(group).unwrap(), vec![SceneNode::Group(group)]);
    }

    #[test]
    fn test_cycles_rejected() {
        let (mut host, root, group, _) = tree();
        assert!(host.add_child(group, root).is_err());
        assert!(host.add_child(group, group).is_err());
    }

    #[test]
    fn test_remove_child_requires_parent() {
        let (mut host, root, group, mesh) = tree();
        assert!(host.remove_child(root, mesh).is_err());
        host.remove_child(group, mesh).unwrap();
        assert_eq!(host.parent(mesh).unwrap(), None);
    }

    #[test]
    fn test_remove_node_drops_subtree() {
        let (mut host, root, group, mesh) = tree();
        host.remove_node(group).unwrap();

        assert!(host.node_kind(mesh).is_err());
        assert_eq!(host.traverse(root).unwrap(), vec![SceneNode::Group(root)]);
    }

    #[test]
    fn test_wrong_kind_reported() {
        let (host, _, group, _) = tree();
        assert!(matches!(
            host.mesh_material(group),
            Err(RenderError::WrongNodeKind { expected: "mesh", .. })
        ));
        assert!(matches!(host.light_intensity(group), Err(RenderError::WrongNodeKind { .. })));
    }
}
