use std::collections::HashMap;
use std::sync::Arc;

use log::info;

use engine::exec::threaded::{self, ThreadedExecOpts};
use engine::model::socket::SocketRef;
use engine::{Node, NodeTree, TreeKind, TypeRegistry, resolve_types, sort_nodes};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let registry = TypeRegistry::with_builtin_types();
    let mut tree = NodeTree::new(TreeKind::Compositor, "demo");

    let mut background = Node::new("composite.color", "Background");
    background.properties.set("width", 128i64);
    background.properties.set("height", 128i64);
    background.properties.set(
        "color",
        engine::PropertyValue::Color([0.1.into(), 0.1.into(), 0.4.into(), 1.0.into()]),
    );
    let background = tree.add_node(background);

    let mut foreground = Node::new("composite.color", "Foreground");
    foreground.properties.set("width", 128i64);
    foreground.properties.set("height", 128i64);
    foreground.properties.set(
        "color",
        engine::PropertyValue::Color([0.9.into(), 0.6.into(), 0.1.into(), 1.0.into()]),
    );
    let foreground = tree.add_node(foreground);

    let mut blur_size = Node::new("composite.value", "Blur Size");
    blur_size.properties.set("value", 2.0);
    let blur_size = tree.add_node(blur_size);
    let blur = tree.add_node(Node::new("composite.blur", "Blur"));
    let mix = tree.add_node(Node::new("composite.mix", "Mix"));
    let mut composite = Node::new("composite.output", "Composite");
    composite.do_output = true;
    let composite = tree.add_node(composite);

    resolve_types(&registry, &mut tree)?;

    let socket = |tree: &NodeTree, node: uuid::Uuid, name: &str, output: bool| {
        let n = tree.node(node).expect("node exists");
        let list = if output { &n.outputs } else { &n.inputs };
        let s = list.iter().find(|s| s.name == name).expect("socket exists");
        SocketRef::new(node, s.id)
    };

    tree.add_link(
        socket(&tree, foreground, "image", true),
        socket(&tree, blur, "image", false),
    )?;
    tree.add_link(
        socket(&tree, background, "image", true),
        socket(&tree, mix, "image1", false),
    )?;
    tree.add_link(
        socket(&tree, blur, "image", true),
        socket(&tree, mix, "image2", false),
    )?;
    tree.add_link(
        socket(&tree, mix, "image", true),
        socket(&tree, composite, "image", false),
    )?;
    tree.add_link(
        socket(&tree, blur_size, "value", true),
        socket(&tree, blur, "size", false),
    )?;

    sort_nodes(&mut tree);

    let opts = ThreadedExecOpts::new(Arc::new(HashMap::<String, String>::new()))
        .with_headless(true)
        .with_progress(Arc::new(|remaining, current| {
            info!(
                "{} node(s) remaining, working on {}",
                remaining,
                current.unwrap_or("-")
            );
        }));
    let outcome = threaded::execute(&mut tree, &opts)?;
    info!("run finished, cancelled = {}", outcome.cancelled);

    let result = tree
        .node(mix)
        .and_then(|n| n.outputs.first())
        .and_then(|s| s.cache.as_ref())
        .and_then(|v| v.as_image().cloned());
    match result {
        Some(image) => println!(
            "Composite result: {}x{} buffer, first pixel = {:?}",
            image.width,
            image.height,
            &image.data[..4]
        ),
        None => println!("No composite result was produced."),
    }

    engine::end_exec(&mut tree);
    Ok(())
}
