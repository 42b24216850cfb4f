//! Serde model of a graph description file.
//!
//! ```json
//! {
//!   "parameters": { "half": { "width": "expr(width / 2)", "height": "expr(height / 2)" } },
//!   "textures": { "noise": { "path": "noise.png", "parameters": { "wrapS": "REPEAT" } } },
//!   "nodes": [
//!     { "name": "scene", "type": "scene", "outputs": { "color": { "parameters": { "type": "HALF_FLOAT" } } } },
//!     { "name": "blur", "shader": "#source(blur)", "inputs": { "tDiffuse": "scene.color" },
//!       "outputs": { "out": { "parameters": "#half" } }, "parameters": { "tNoise": "#noise" } },
//!     { "name": "present", "shader": "#source(copy)", "inputs": { "tDiffuse": "blur" } }
//!   ]
//! }
//! ```
//!
//! Object maps whose order matters (inputs, outputs, parameters) keep the
//! order they appear in the file.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphDesc {
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    /// Named texture-shape presets, referenced as `"#name"`.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamsDesc>,
    #[serde(default)]
    pub textures: BTreeMap<String, TextureAssetDesc>,
    /// Graph-local shader sources, referenced as `"#name"`.
    #[serde(default)]
    pub shaders: BTreeMap<String, String>,
}

impl GraphDesc {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Filter,
    Scene,
    Texture,
    Group,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeDesc {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: NodeType,
    #[serde(default)]
    pub shader: Option<String>,
    /// For groups: group input -> `child.pin`.
    #[serde(default, deserialize_with = "ordered")]
    pub inputs: Vec<(String, InputRefDesc)>,
    /// For groups: group output -> `child.pin`.
    #[serde(default, deserialize_with = "ordered")]
    pub outputs: Vec<(String, OutputEntryDesc)>,
    #[serde(default, deserialize_with = "ordered")]
    pub parameters: Vec<(String, ValueDesc)>,
    #[serde(default)]
    pub defines: BTreeMap<String, serde_json::Value>,
    /// Texture nodes: `"#asset"`; defaults to the asset named like the node.
    #[serde(default)]
    pub texture: Option<String>,
    /// Groups: children.
    #[serde(default)]
    pub nodes: Vec<NodeDesc>,
    /// Groups: group input -> outer producer.
    #[serde(default, deserialize_with = "ordered")]
    pub bind: Vec<(String, InputRefDesc)>,
}

/// `"node.pin"`, `"node"` or `{ "node": ..., "pin": ... }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum InputRefDesc {
    Text(String),
    Pin { node: String, pin: Option<String> },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OutputEntryDesc {
    /// Group output link, `"child.pin"`.
    Link(String),
    Output(OutputDescJson),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputDescJson {
    #[serde(default)]
    pub attachment: Option<AttachmentDesc>,
    #[serde(default)]
    pub keep_last_frame: bool,
    #[serde(default)]
    pub output_last_frame: bool,
    #[serde(default)]
    pub terminal: bool,
    #[serde(default)]
    pub parameters: Option<ParamsRefDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum AttachmentDesc {
    Name(String),
    GlEnum(u32),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ParamsRefDesc {
    Preset(String),
    Inline(ParamsDesc),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamsDesc {
    #[serde(default)]
    pub width: Option<NumberDesc>,
    #[serde(default)]
    pub height: Option<NumberDesc>,
    #[serde(default)]
    pub scale: Option<f64>,
    /// Pixel format (`RGBA`, `HALF_FLOAT`, `rgba16float`, ...).
    #[serde(default, alias = "format")]
    pub r#type: Option<String>,
    #[serde(default)]
    pub min_filter: Option<String>,
    #[serde(default)]
    pub mag_filter: Option<String>,
    #[serde(default)]
    pub wrap_s: Option<String>,
    #[serde(default)]
    pub wrap_t: Option<String>,
    #[serde(default)]
    pub use_mipmap: Option<bool>,
    #[serde(default)]
    pub anisotropic: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumberDesc {
    Number(f64),
    Text(String),
}

/// A node parameter: number, vector, `"#texture"` or `"expr(...)"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ValueDesc {
    Bool(bool),
    Number(f64),
    Vector(Vec<f64>),
    Text(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct TextureAssetDesc {
    pub path: TexturePathDesc,
    #[serde(default)]
    pub parameters: Option<ParamsDesc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum TexturePathDesc {
    Single(String),
    Faces(Vec<String>),
    Cube(CubeFacesDesc),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CubeFacesDesc {
    pub px: String,
    pub nx: String,
    pub py: String,
    pub ny: String,
    pub pz: String,
    pub nz: String,
}

impl CubeFacesDesc {
    /// Faces in +x, -x, +y, -y, +z, -z order.
    pub fn ordered(&self) -> [&str; 6] {
        [&self.px, &self.nx, &self.py, &self.ny, &self.pz, &self.nz]
    }
}

/// Deserializes a JSON object into `(key, value)` pairs in document order.
fn ordered<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((key, value)) = map.next_entry::<String, V>()? {
                out.push((key, value));
            }
            Ok(out)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_documented_shape() {
        let json = r##"{
          "parameters": { "half": { "width": "expr(width / 2)", "height": 128, "type": "HALF_FLOAT" } },
          "textures": {
            "noise": { "path": "noise.png" },
            "sky": { "path": ["px.png", "nx.png", "py.png", "ny.png", "pz.png", "nz.png"] }
          },
          "nodes": [
            { "name": "scene", "type": "scene", "outputs": { "depth": { "attachment": "DEPTH_ATTACHMENT" }, "color": {} } },
            { "name": "blur", "shader": "#source(blur)",
              "inputs": { "tDiffuse": "scene.color", "tDepth": { "node": "scene", "pin": "depth" } },
              "outputs": { "out": { "parameters": "#half", "keepLastFrame": true } },
              "parameters": { "amount": 0.5, "offset": [1, 2], "tNoise": "#noise", "size": "expr(width)" },
              "defines": { "TAPS": 9 } }
          ]
        }"##;
        let desc = GraphDesc::from_json(json).unwrap();

        assert_eq!(desc.nodes.len(), 2);
        assert_eq!(desc.nodes[0].kind, NodeType::Scene);
        assert_eq!(desc.nodes[1].kind, NodeType::Filter);

        let outputs: Vec<_> = desc.nodes[0].outputs.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(outputs, ["depth", "color"]);

        let blur = &desc.nodes[1];
        assert_eq!(blur.inputs[0], ("tDiffuse".into(), InputRefDesc::Text("scene.color".into())));
        assert_eq!(
            blur.inputs[1].1,
            InputRefDesc::Pin { node: "scene".into(), pin: Some("depth".into()) }
        );
        assert!(matches!(&blur.outputs[0].1, OutputEntryDesc::Output(o) if o.keep_last_frame));
        assert_eq!(blur.parameters[1].1, ValueDesc::Vector(vec![1.0, 2.0]));

        assert!(matches!(desc.textures["sky"].path, TexturePathDesc::Faces(ref f) if f.len() == 6));
        assert_eq!(desc.parameters["half"].height, Some(NumberDesc::Number(128.0)));
    }

    #[test]
    fn groups_use_links() {
        let json = r#"{ "nodes": [ { "name": "bloom", "type": "group",
            "bind": { "src": "scene.color" },
            "inputs": { "src": "bright.tDiffuse" },
            "outputs": { "out": "blur.out" },
            "nodes": [ { "name": "bright", "shader": "x" }, { "name": "blur", "shader": "y" } ] } ] }"#;
        let desc = GraphDesc::from_json(json).unwrap();
        let g = &desc.nodes[0];
        assert_eq!(g.kind, NodeType::Group);
        assert_eq!(g.nodes.len(), 2);
        assert!(matches!(&g.outputs[0].1, OutputEntryDesc::Link(l) if l == "blur.out"));
    }

    #[test]
    fn cube_faces_object() {
        let json = r#"{ "path": { "px": "a", "nx": "b", "py": "c", "ny": "d", "pz": "e", "nz": "f" } }"#;
        let asset: TextureAssetDesc = serde_json::from_str(json).unwrap();
        match asset.path {
            TexturePathDesc::Cube(c) => assert_eq!(c.ordered(), ["a", "b", "c", "d", "e", "f"]),
            other => panic!("unexpected {other:?}"),
        }
    }
}
