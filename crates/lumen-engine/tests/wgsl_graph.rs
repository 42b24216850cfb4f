//! Dry runs of a graph file with WGSL filters on the headless backend.

use std::fs;
use std::path::PathBuf;

use lumen_engine::compositor::headless::{HeadlessBackend, HeadlessLoader, HeadlessScene};
use lumen_engine::compositor::{
    build_compositor, load_graph_file, BuildContext, BuildError, Built, GraphDesc, SceneRenderer, ShaderLibrary,
};
use lumen_engine::coords::Viewport;

const COPY: &str = r#"
@group(0) @binding(0) var tDiffuse: texture_2d<f32>;
@group(0) @binding(1) var tDiffuse_sampler: sampler;

@fragment
fn fs_main(in: FullscreenOut) -> @location(0) vec4<f32> {
    return textureSample(tDiffuse, tDiffuse_sampler, in.uv);
}
"#;

const GRAPH: &str = r##"{
  "shaders": {
    "split": "struct Out { @location(0) color: vec4<f32>, @location(1) glow: vec4<f32> };\n@group(0) @binding(0) var tDiffuse: texture_2d<f32>;\n@group(0) @binding(1) var tDiffuse_sampler: sampler;\n@fragment\nfn fs_main(in: FullscreenOut) -> Out {\n  let c = textureSample(tDiffuse, tDiffuse_sampler, in.uv);\n  var out: Out;\n  out.color = c;\n  out.glow = max(c - vec4<f32>(0.8), vec4<f32>(0.0));\n  return out;\n}\n",
    "trail": "struct Params { decay: f32 };\n@group(0) @binding(0) var tDiffuse: texture_2d<f32>;\n@group(0) @binding(1) var tPrev: texture_2d<f32>;\n@group(0) @binding(2) var tUnused: texture_2d<f32>;\n@group(0) @binding(3) var smp: sampler;\n@group(0) @binding(4) var<uniform> params: Params;\n@fragment\nfn fs_main(in: FullscreenOut) -> @location(0) vec4<f32> {\n#ifdef SHARP\n  return textureSample(tDiffuse, smp, in.uv);\n#else\n  return max(textureSample(tDiffuse, smp, in.uv), textureSample(tPrev, smp, in.uv) * params.decay);\n#endif\n}\n"
  },
  "parameters": { "half": { "width": "expr(width / 2)", "height": "expr(height / 2)", "type": "HALF_FLOAT" } },
  "nodes": [
    { "name": "scene", "type": "scene", "outputs": { "color": {} } },
    { "name": "split", "shader": "#split", "inputs": { "tDiffuse": "scene.color" },
      "outputs": {
        "color": { "attachment": "COLOR_ATTACHMENT0" },
        "glow": { "attachment": "COLOR_ATTACHMENT1", "parameters": "#half" }
      } },
    { "name": "trail", "shader": "#trail", "parameters": { "decay": 0.9 },
      "inputs": { "tDiffuse": "split.glow", "tPrev": "trail.out", "tUnused": "split.color" },
      "outputs": { "out": { "keepLastFrame": true, "parameters": "#half" } } },
    { "name": "present", "shader": "#source(copy)", "inputs": { "tDiffuse": "trail" } }
  ]
}"##;

fn graph_file(name: &str, contents: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("lumen-wgsl-graph-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn build(desc: &GraphDesc, b: &mut HeadlessBackend) -> Result<Built<HeadlessBackend>, BuildError> {
    let mut loader = HeadlessLoader::default();
    let mut ctx = BuildContext::new(b)
        .with_shaders(ShaderLibrary::new().with("copy", COPY))
        .with_loader(&mut loader)
        .with_scene_factory(|name: &str| Box::new(HeadlessScene::new(name)) as Box<dyn SceneRenderer<HeadlessBackend>>);
    build_compositor(desc, &mut ctx)
}

#[test]
fn graph_file_runs_headless() {
    let desc = load_graph_file(graph_file("bloom.json", GRAPH)).unwrap();
    let mut b = HeadlessBackend::new(Viewport::new(640.0, 360.0, 2.0));
    let mut built = build(&desc, &mut b).unwrap();

    assert_eq!(built.compositor.execution_order().unwrap(), ["scene", "split", "trail", "present"]);

    built.compositor.render(&mut b).unwrap();
    let split = b.last_draw("split").unwrap().clone();
    assert_eq!(split.outputs.len(), 2);
    let glow = split.outputs.iter().find(|(pin, ..)| pin == "glow").unwrap().1;
    assert_eq!(b.desc(glow).map(|d| (d.width, d.height)), Some((320, 180)));

    let trail = b.last_draw("trail").unwrap().clone();
    assert_eq!(trail.input("tDiffuse"), split.output("glow"));
    assert_eq!(trail.input("tPrev"), Some(0));
    assert_eq!(trail.input("tUnused"), None, "unused bindings are not bound");
    assert_eq!(trail.float("decay"), Some(0.9));

    let present = b.last_draw("present").unwrap();
    assert!(present.to_screen);
    assert_eq!(present.input("tDiffuse"), trail.output("out"));

    built.compositor.render(&mut b).unwrap();
    assert_eq!(b.last_draw("trail").unwrap().input("tPrev"), trail.output("out"));
}

#[test]
fn defines_select_shader_branches() {
    let mut desc = GraphDesc::from_json(GRAPH).unwrap();
    let trail = desc.nodes.iter_mut().find(|n| n.name == "trail").unwrap();
    trail.defines.insert("SHARP".into(), serde_json::Value::Bool(true));

    let mut b = HeadlessBackend::new(Viewport::new(64.0, 64.0, 1.0));
    let mut built = build(&desc, &mut b).unwrap();
    built.compositor.render(&mut b).unwrap();

    let trail = b.last_draw("trail").unwrap();
    assert!(trail.input("tDiffuse").is_some());
    assert_eq!(trail.input("tPrev"), None);
    assert_eq!(trail.float("decay"), None);
}

#[test]
fn invalid_wgsl_fails_the_build() {
    let broken = GRAPH.replace("textureSample(tDiffuse, tDiffuse_sampler, in.uv);\\n  var out", "undefined_fn();\\n  var out");
    assert_ne!(broken, GRAPH);
    let desc = GraphDesc::from_json(&broken).unwrap();
    let mut b = HeadlessBackend::new(Viewport::new(64.0, 64.0, 1.0));
    let err = build(&desc, &mut b).err().unwrap();
    assert!(matches!(err, BuildError::Program { ref node, .. } if node == "split"), "unexpected error: {err}");
}
