//! Hardcoded built-in node types for shader and compositor trees.

use std::sync::Arc;

use log::debug;

use super::{NodeClass, NodeExecFn, SocketTemplate, TypeDescriptor, TypeRegistry};
use crate::exec::ExecCtx;
use crate::model::node::Node;
use crate::model::socket::{ImageBuf, SocketType, SocketValue};
use crate::model::tree::TreeKind;

/// Register every built-in node type.
pub fn register_all(registry: &mut TypeRegistry) {
    for descriptor in shader_nodes() {
        registry.register(TreeKind::Shader, descriptor);
    }
    for descriptor in compositor_nodes() {
        registry.register(TreeKind::Compositor, descriptor);
    }
}

/// Helper: create input template.
fn inp(name: &str, dt: SocketType) -> SocketTemplate {
    SocketTemplate::new(name, dt)
}

/// Helper: create output template.
fn out(name: &str, dt: SocketType) -> SocketTemplate {
    SocketTemplate::new(name, dt)
}

/// Helper: shorthand for building a descriptor.
fn node(type_id: &str, name: &str, class: NodeClass) -> TypeDescriptor {
    TypeDescriptor::new(type_id, name, class)
}

fn exec_fn(
    f: impl Fn(&ExecCtx, &Node, &[SocketValue], &mut [SocketValue]) + Send + Sync + 'static,
) -> NodeExecFn {
    Arc::new(f)
}

fn shader_nodes() -> Vec<TypeDescriptor> {
    use SocketType::*;
    vec![
        node("shader.value", "Value", NodeClass::Input)
            .with_description("Single numeric value from the node settings")
            .with_outputs(vec![out("value", Value).with_range(0.0, 1000.0)])
            .with_exec(exec_fn(|_ctx, node, _inputs, outputs| {
                outputs[0] = SocketValue::Value(node.properties.number("value", 0.5));
            })),
        node("shader.rgb", "RGB", NodeClass::Input)
            .with_description("Constant color from the node settings")
            .with_outputs(vec![out("color", Color)])
            .with_exec(exec_fn(|_ctx, node, _inputs, outputs| {
                outputs[0] =
                    SocketValue::Color(node.properties.color("color", [0.5, 0.5, 0.5, 1.0]));
            })),
        node("shader.math", "Math", NodeClass::Operator)
            .with_description("Scalar arithmetic; the operation comes from the settings")
            .with_inputs(vec![
                inp("a", Value).with_range(-1000.0, 1000.0),
                inp("b", Value).with_range(-1000.0, 1000.0),
            ])
            .with_outputs(vec![out("value", Value).with_range(-1000.0, 1000.0)])
            .with_exec(exec_fn(|_ctx, node, inputs, outputs| {
                let a = inputs[0].as_value(0.0);
                let b = inputs[1].as_value(0.0);
                let result = match node.properties.string("operation").unwrap_or("add") {
                    "subtract" => a - b,
                    "multiply" => a * b,
                    "divide" => {
                        if b == 0.0 {
                            0.0
                        } else {
                            a / b
                        }
                    }
                    "minimum" => a.min(b),
                    "maximum" => a.max(b),
                    _ => a + b,
                };
                outputs[0] = SocketValue::Value(result);
            })),
        node("shader.mix", "Mix", NodeClass::Operator)
            .with_description("Blend two colors by a factor")
            .with_inputs(vec![
                inp("fac", Value).with_default([0.5, 0.0, 0.0, 0.0]),
                inp("color1", Color).with_default([0.0, 0.0, 0.0, 1.0]),
                inp("color2", Color).with_default([1.0, 1.0, 1.0, 1.0]),
            ])
            .with_outputs(vec![out("color", Color)])
            .with_exec(exec_fn(|_ctx, _node, inputs, outputs| {
                let fac = inputs[0].as_value(0.5).clamp(0.0, 1.0);
                let a = inputs[1].as_color([0.0, 0.0, 0.0, 1.0]);
                let b = inputs[2].as_color([1.0, 1.0, 1.0, 1.0]);
                let mut mixed = [0.0; 4];
                for i in 0..4 {
                    mixed[i] = a[i] * (1.0 - fac) + b[i] * fac;
                }
                outputs[0] = SocketValue::Color(mixed);
            })),
        node("shader.output", "Material Output", NodeClass::Output)
            .with_description("Surfaces the shaded color")
            .with_inputs(vec![inp("color", Color).with_default([0.0, 0.0, 0.0, 1.0])]),
    ]
}

fn compositor_nodes() -> Vec<TypeDescriptor> {
    use SocketType::*;
    vec![
        node("composite.color", "Color", NodeClass::Input)
            .with_description("Solid color buffer; size comes from the settings")
            .with_outputs(vec![out("image", Image)])
            .with_exec(exec_fn(|_ctx, node, _inputs, outputs| {
                let width = node.properties.integer("width", 64).max(1) as usize;
                let height = node.properties.integer("height", 64).max(1) as usize;
                let color = node.properties.color("color", [0.0, 0.0, 0.0, 1.0]);
                let mut buf = ImageBuf::new(width, height, 4);
                for pixel in buf.data.chunks_exact_mut(4) {
                    for (component, value) in pixel.iter_mut().zip(color) {
                        *component = value as f32;
                    }
                }
                outputs[0] = SocketValue::Image(Arc::new(buf));
            })),
        node("composite.value", "Value", NodeClass::Input)
            .with_outputs(vec![out("value", Value).with_range(0.0, 1000.0)])
            .with_exec(exec_fn(|_ctx, node, _inputs, outputs| {
                outputs[0] = SocketValue::Value(node.properties.number("value", 0.0));
            })),
        node("composite.blur", "Blur", NodeClass::Operator)
            .with_description("Box blur with a radius in pixels")
            .with_inputs(vec![
                inp("image", Image),
                inp("size", Value).with_range(0.0, 256.0),
            ])
            .with_outputs(vec![out("image", Image)])
            .with_exec(exec_fn(|_ctx, node, inputs, outputs| {
                let Some(src) = inputs[0].as_image() else {
                    return;
                };
                let radius = inputs[1]
                    .as_value(node.properties.number("size", 0.0))
                    .max(0.0) as usize;
                outputs[0] = SocketValue::Image(Arc::new(box_blur(src, radius)));
            })),
        node("composite.mix", "Mix", NodeClass::Operator)
            .with_description("Blend two buffers by a factor")
            .with_inputs(vec![
                inp("fac", Value).with_default([0.5, 0.0, 0.0, 0.0]),
                inp("image1", Image),
                inp("image2", Image),
            ])
            .with_outputs(vec![out("image", Image)])
            .with_exec(exec_fn(|_ctx, _node, inputs, outputs| {
                let fac = inputs[0].as_value(0.5).clamp(0.0, 1.0) as f32;
                match (inputs[1].as_image(), inputs[2].as_image()) {
                    (Some(a), Some(b)) if a.data.len() == b.data.len() => {
                        let mut mixed = ImageBuf::new(a.width, a.height, a.channels);
                        for (slot, (x, y)) in
                            mixed.data.iter_mut().zip(a.data.iter().zip(b.data.iter()))
                        {
                            *slot = x * (1.0 - fac) + y * fac;
                        }
                        outputs[0] = SocketValue::Image(Arc::new(mixed));
                    }
                    (Some(a), _) => outputs[0] = SocketValue::Image(Arc::clone(a)),
                    (None, Some(b)) => outputs[0] = SocketValue::Image(Arc::clone(b)),
                    (None, None) => {}
                }
            })),
        node("composite.viewer", "Viewer", NodeClass::Output)
            .with_description("Display-only preview of a buffer")
            .with_display_only()
            .with_inputs(vec![inp("image", Image)])
            .with_exec(exec_fn(|_ctx, node, inputs, _outputs| {
                if let Some(image) = inputs[0].as_image() {
                    debug!(
                        "viewer '{}' showing {}x{} buffer",
                        node.name, image.width, image.height
                    );
                }
            })),
        node("composite.output", "Composite", NodeClass::Output)
            .with_description("Final render result of the tree")
            .with_inputs(vec![inp("image", Image)])
            .with_exec(exec_fn(|_ctx, node, inputs, _outputs| {
                if let Some(image) = inputs[0].as_image() {
                    debug!(
                        "composite '{}' received {}x{} result",
                        node.name, image.width, image.height
                    );
                }
            })),
        node("composite.file_output", "File Output", NodeClass::Output)
            .with_description("Writes a buffer to the configured path")
            .with_non_exclusive_output()
            .with_inputs(vec![inp("image", Image)])
            .with_exec(exec_fn(|_ctx, node, inputs, _outputs| {
                let path = node.properties.string("path").unwrap_or("output.png");
                if let Some(image) = inputs[0].as_image() {
                    debug!(
                        "file output '{}' would write {}x{} buffer to {}",
                        node.name, image.width, image.height, path
                    );
                }
            })),
    ]
}

fn box_blur(src: &ImageBuf, radius: usize) -> ImageBuf {
    if radius == 0 {
        return src.clone();
    }
    let (width, height, channels) = (src.width, src.height, src.channels);
    let mut out = ImageBuf::new(width, height, channels);
    let r = radius as isize;
    for y in 0..height as isize {
        for x in 0..width as isize {
            for c in 0..channels {
                let mut sum = 0.0f32;
                let mut samples = 0usize;
                for dy in -r..=r {
                    for dx in -r..=r {
                        let (sx, sy) = (x + dx, y + dy);
                        if sx < 0 || sy < 0 || sx >= width as isize || sy >= height as isize {
                            continue;
                        }
                        sum += src.data[(sy as usize * width + sx as usize) * channels + c];
                        samples += 1;
                    }
                }
                out.data[(y as usize * width + x as usize) * channels + c] =
                    sum / samples.max(1) as f32;
            }
        }
    }
    out
}
