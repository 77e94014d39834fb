//! Markdown reference of the registered protocol methods.

use std::fmt::Write;

use serde_json::Value;

use crate::registry::{MethodDescriptor, MethodKind, MethodRegistry};

/// Render every method of `registry`, in name order.
pub fn render_markdown(registry: &MethodRegistry) -> String {
    let mut out = String::new();
    out.push_str("# Protocol Methods\n\n");

    if registry.is_empty() {
        out.push_str("_No methods are registered._\n");
        return out;
    }

    out.push_str("| Method | Kind | Service |\n|---|---|---|\n");
    for descriptor in registry.descriptors() {
        let _ = writeln!(
            out,
            "| `{}` | {} | {} |",
            descriptor.name,
            kind_label(descriptor.kind),
            descriptor.service.unwrap_or("-")
        );
    }
    out.push('\n');

    for descriptor in registry.descriptors() {
        render_method(&mut out, descriptor);
    }
    out
}

fn render_method(out: &mut String, descriptor: &MethodDescriptor) {
    let _ = writeln!(out, "## `{}`\n", descriptor.name);
    let _ = writeln!(out, "- Kind: {}", kind_label(descriptor.kind));
    if let Some(service) = descriptor.service {
        let _ = writeln!(out, "- Service: {}", service);
    }
    let _ = writeln!(out, "- Parameters: `{}`", short_type_name(descriptor.params_type));
    if let Some(result_type) = descriptor.result_type {
        let _ = writeln!(out, "- Result: `{}`", short_type_name(result_type));
    }
    out.push('\n');

    render_schema(out, "Parameters", &descriptor.params_schema);
    if let Some(schema) = &descriptor.result_schema {
        render_schema(out, "Result", schema);
    }
}

fn render_schema(out: &mut String, title: &str, schema: &Value) {
    let pretty = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    let _ = writeln!(out, "### {}\n\n```json\n{}\n```\n", title, pretty);
}

fn kind_label(kind: MethodKind) -> &'static str {
    match kind {
        MethodKind::Request => "request",
        MethodKind::Notification => "notification",
    }
}

/// `my_crate::module::Params` -> `Params`, keeping generic arguments readable.
fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut segment = String::new();
    for ch in full.chars() {
        match ch {
            '<' | '>' | ',' | ' ' | '(' | ')' | '[' | ']' | ';' | '&' => {
                short.push_str(last_path_segment(&segment));
                segment.clear();
                short.push(ch);
            }
            _ => segment.push(ch),
        }
    }
    short.push_str(last_path_segment(&segment));
    short
}

fn last_path_segment(path: &str) -> &str {
    path.rsplit("::").next().unwrap_or(path)
}
