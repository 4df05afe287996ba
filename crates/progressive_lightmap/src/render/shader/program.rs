//! Program descriptor, uniform table and source patching

use std::collections::BTreeMap;

use crate::foundation::math::{Vec2, Vec3};
use crate::render::api::TextureHandle;

/// Errors produced while deriving or patching a program
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    /// The stage source has no `void main(` entry point to patch around
    #[error("{stage} source of `{label}` has no `void main()` entry point")]
    MissingEntryPoint {
        /// Program label
        label: String,
        /// "vertex" or "fragment"
        stage: &'static str,
    },

    /// The stage source has no closing brace after its entry point
    #[error("{stage} source of `{label}` is not terminated by a closing brace")]
    Unterminated {
        /// Program label
        label: String,
        /// "vertex" or "fragment"
        stage: &'static str,
    },
}

/// Value bound to a named uniform slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    /// Scalar
    Float(f32),
    /// Two-component vector
    Vec2(Vec2),
    /// Three-component vector or colour
    Vec3(Vec3),
    /// Sampler, `None` while unbound
    Texture(Option<TextureHandle>),
}

/// Named uniform slots of a program, ordered by name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UniformTable {
    slots: BTreeMap<String, UniformValue>,
}

impl UniformTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a slot
    pub fn set(&mut self, name: impl Into<String>, value: UniformValue) {
        self.slots.insert(name.into(), value);
    }

    /// Look up a slot
    pub fn get(&self, name: &str) -> Option<&UniformValue> {
        self.slots.get(name)
    }

    /// Whether a slot exists
    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Scalar value of a slot, `None` if absent or not a float
    pub fn float(&self, name: &str) -> Option<f32> {
        match self.slots.get(name) {
            Some(UniformValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// Texture bound to a slot, `None` if absent, unbound or not a sampler
    pub fn texture(&self, name: &str) -> Option<TextureHandle> {
        match self.slots.get(name) {
            Some(UniformValue::Texture(t)) => *t,
            _ => None,
        }
    }

    /// Iterate slots in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &UniformValue)> {
        self.slots.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Vertex-stage extension point
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VertexOutput {
    /// Rasterize in texture space: clip position taken from a UV attribute
    /// remapped from [0, 1] to [-1, 1], the UV forwarded as `vLightmapUv`
    UvUnwrap {
        /// Name of the UV attribute to unwrap along
        attribute: String,
    },
}

/// Fragment-stage extension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentOutput {
    /// Exponential moving average with the previous buffer
    TemporalBlend,
    /// 8-tap box filter over the previous buffer
    EdgeBlur,
    /// Drop every fragment
    Discard,
}

/// A shading program: base sources, uniform slots and extension points
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderProgram {
    /// Debug label
    pub label: String,
    /// Base vertex source as generated by the host
    pub vertex_source: String,
    /// Base fragment source as generated by the host
    pub fragment_source: String,
    /// Uniform slots
    pub uniforms: UniformTable,
    /// Vertex output override
    pub vertex_output: Option<VertexOutput>,
    /// Fragment output override
    pub fragment_output: Option<FragmentOutput>,
}

impl ShaderProgram {
    /// Create a base program with no overrides
    pub fn new(label: impl Into<String>, vertex_source: impl Into<String>, fragment_source: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertex_source: vertex_source.into(),
            fragment_source: fragment_source.into(),
            uniforms: UniformTable::new(),
            vertex_output: None,
            fragment_output: None,
        }
    }

    /// Vertex source with the vertex extension point applied
    pub fn patched_vertex_source(&self) -> Result<String, ShaderError> {
        let Some(output) = &self.vertex_output else {
            return Ok(self.vertex_source.clone());
        };
        let (declarations, body) = match output {
            VertexOutput::UvUnwrap { attribute } => (
                "varying vec2 vLightmapUv;\n".to_string(),
                format!(
                    "\tvLightmapUv = {attribute};\n\tgl_Position = vec4(({attribute} - 0.5) * 2.0, 1.0, 1.0);\n"
                ),
            ),
        };
        inject(&self.label, "vertex", &self.vertex_source, &declarations, &body)
    }

    /// Fragment source with the fragment extension point applied
    pub fn patched_fragment_source(&self) -> Result<String, ShaderError> {
        let Some(output) = self.fragment_output else {
            return Ok(self.fragment_source.clone());
        };
        let (declarations, body) = match output {
            FragmentOutput::TemporalBlend => (
                "varying vec2 vLightmapUv;\nuniform sampler2D previousBuffer;\nuniform float averagingWindow;\n",
                "\tvec3 texelOld = texture2D(previousBuffer, vLightmapUv).rgb;\n\
                 \tgl_FragColor.rgb = mix(texelOld, gl_FragColor.rgb, 1.0 / averagingWindow);\n",
            ),
            FragmentOutput::EdgeBlur => (
                "varying vec2 vLightmapUv;\nuniform sampler2D previousBuffer;\nuniform float pixelOffset;\n",
                EDGE_BLUR_BODY,
            ),
            FragmentOutput::Discard => ("", "\tdiscard;\n"),
        };
        inject(&self.label, "fragment", &self.fragment_source, declarations, body)
    }
}

const EDGE_BLUR_BODY: &str = "\tgl_FragColor.rgb = (\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2( pixelOffset,  0.0        )).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2( 0.0        ,  pixelOffset)).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2( 0.0        , -pixelOffset)).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2(-pixelOffset,  0.0        )).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2( pixelOffset,  pixelOffset)).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2(-pixelOffset,  pixelOffset)).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2( pixelOffset, -pixelOffset)).rgb +\n\
    \t\ttexture2D(previousBuffer, vLightmapUv + vec2(-pixelOffset, -pixelOffset)).rgb) / 8.0;\n";

/// Insert `declarations` before the entry point and `body` before its closing brace
fn inject(label: &str, stage: &'static str, source: &str, declarations: &str, body: &str) -> Result<String, ShaderError> {
    let main_at = source.find("void main(").ok_or_else(|| ShaderError::MissingEntryPoint {
        label: label.to_string(),
        stage,
    })?;
    let close_at = source
        .rfind('}')
        .filter(|&at| at > main_at)
        .ok_or_else(|| ShaderError::Unterminated {
            label: label.to_string(),
            stage,
        })?;

    let mut patched = String::with_capacity(source.len() + declarations.len() + body.len());
    patched.push_str(&source[..main_at]);
    patched.push_str(declarations);
    patched.push_str(&source[main_at..close_at]);
    patched.push_str(body);
    patched.push_str(&source[close_at..]);
    Ok(patched)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERTEX: &str = "attribute vec2 uv;\nvoid main() {\n\tgl_Position = vec4(0.0);\n}\n";
    const FRAGMENT: &str = "void main() {\n\tgl_FragColor = vec4(1.0);\n}";

    #[test]
    fn test_unpatched_sources_pass_through() {
        let program = ShaderProgram::new("base", VERTEX, FRAGMENT);
        assert_eq!(program.patched_vertex_source().unwrap(), VERTEX);
        assert_eq!(program.patched_fragment_source().unwrap(), FRAGMENT);
    }

    #[test]
    fn test_uv_unwrap_overrides_position_last() {
        let mut program = ShaderProgram::new("base", VERTEX, FRAGMENT);
        program.vertex_output = Some(VertexOutput::UvUnwrap { attribute: "uv".into() });

        let source = program.patched_vertex_source().unwrap();
        let decl = source.find("varying vec2 vLightmapUv;").unwrap();
        let main = source.find("void main(").unwrap();
        let original = source.find("gl_Position = vec4(0.0)").unwrap();
        let unwrap = source.find("gl_Position = vec4((uv - 0.5) * 2.0, 1.0, 1.0);").unwrap();

        assert!(decl < main);
        assert!(original < unwrap);
        assert!(source.trim_end().ends_with('}'));
    }

    #[test]
    fn test_temporal_blend_declares_named_slots() {
        let mut program = ShaderProgram::new("base", VERTEX, FRAGMENT);
        program.fragment_output = Some(FragmentOutput::TemporalBlend);

        let source = program.patched_fragment_source().unwrap();
        assert!(source.contains("uniform sampler2D previousBuffer;"));
        assert!(source.contains("uniform float averagingWindow;"));
        assert!(source.contains("mix(texelOld, gl_FragColor.rgb, 1.0 / averagingWindow)"));
    }

    #[test]
    fn test_missing_entry_point_is_reported() {
        let mut program = ShaderProgram::new("broken", "attribute vec3 position;", FRAGMENT);
        program.vertex_output = Some(VertexOutput::UvUnwrap { attribute: "uv".into() });

        assert_eq!(
            program.patched_vertex_source(),
            Err(ShaderError::MissingEntryPoint { label: "broken".into(), stage: "vertex" })
        );
    }

    #[test]
    fn test_unterminated_body_is_reported() {
        let mut program = ShaderProgram::new("broken", VERTEX, "} void main() {");
        program.fragment_output = Some(FragmentOutput::Discard);

        assert!(matches!(program.patched_fragment_source(), Err(ShaderError::Unterminated { .. })));
    }

    #[test]
    fn test_uniform_table_typed_lookup() {
        let mut table = UniformTable::new();
        table.set("averagingWindow", UniformValue::Float(20.0));
        table.set("previousBuffer", UniformValue::Texture(Some(TextureHandle(4))));

        assert_eq!(table.float("averagingWindow"), Some(20.0));
        assert_eq!(table.texture("previousBuffer"), Some(TextureHandle(4)));
        assert_eq!(table.float("previousBuffer"), None);
        assert_eq!(table.len(), 2);
    }
}
