//! Scans arbitrary binary data for embedded protobuf `FileDescriptorProto`
//! messages, decodes them, topologically sorts by `import` edges, and
//! re-emits `.proto` source text.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;

use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, EnumDescriptorProto, FileDescriptorProto, ServiceDescriptorProto};

use crate::error::{Error, Result};
use crate::wire::WireReader;

/// A scanned and decoded `.proto` file, with its rendered source text
/// filled in once topological sort completes.
#[derive(Debug, Clone)]
pub struct ProtoFile {
    pub path: String,
    pub dependencies: Vec<String>,
    pub descriptor: FileDescriptorProto,
    pub rendered_source: Option<String>,
}

/// The wire tag for field #1, length-delimited — the `name` field of
/// `FileDescriptorProto`.
const NAME_FIELD_TAG: u8 = 0x0A;

const DESCRIPTOR_PROTO_META_SCHEMA: &str = "google/protobuf/descriptor.proto";

/// Scans `data` for embedded `FileDescriptorProto` messages. Each verified
/// candidate is decoded and kept unless its declared name is
/// `google/protobuf/descriptor.proto` (the meta-schema, always dropped to
/// avoid trivial embedding).
pub fn scan(data: &[u8]) -> Vec<ProtoFile> {
    let mut files = Vec::new();
    let mut search_start = 0usize;

    while let Some(hit) = find_proto_substring(data, search_start) {
        search_start = hit + 1;

        let Some(tag_pos) = find_backward_name_tag(data, hit) else { continue };

        let mut reader = WireReader::new(&data[tag_pos..]);
        let Ok((field_number, wire_type)) = reader.read_tag() else { continue };
        if field_number != 1 || wire_type != 2 {
            continue;
        }
        let Ok(name_bytes) = reader.read_length_delimited() else { continue };
        // Verify the length prefix reaches exactly the byte after ".proto".
        let name_end = tag_pos + reader.position();
        let expected_end = hit + ".proto".len();
        if name_end != expected_end {
            continue;
        }
        if std::str::from_utf8(name_bytes).is_err() {
            continue;
        }

        let mut scan_reader = WireReader::new(&data[tag_pos..]);
        let Ok((consumed, hit_sentinel)) = scan_reader.scan_until_null_tag() else { continue };
        // `consumed` includes the trailing null-tag byte when one was found;
        // prost rejects a tag with field number 0, so that byte must not be
        // handed to the decoder.
        let message_len = if hit_sentinel { consumed - 1 } else { consumed };
        let descriptor_bytes = &data[tag_pos..tag_pos + message_len];

        let Ok(descriptor) = FileDescriptorProto::decode(descriptor_bytes) else { continue };
        let Some(name) = descriptor.name.clone() else { continue };
        if !name.ends_with(".proto") {
            continue;
        }
        if name == DESCRIPTOR_PROTO_META_SCHEMA {
            continue;
        }

        files.push(ProtoFile {
            path: name,
            dependencies: descriptor.dependency.clone(),
            descriptor,
            rendered_source: None,
        });
    }

    files
}

fn find_proto_substring(data: &[u8], start: usize) -> Option<usize> {
    let needle = b".proto";
    if start >= data.len() {
        return None;
    }
    data[start..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| start + p)
}

/// Searches backward from `hit` for the nearest `0x0A` tag byte.
fn find_backward_name_tag(data: &[u8], hit: usize) -> Option<usize> {
    let mut i = hit;
    loop {
        if data[i] == NAME_FIELD_TAG {
            return Some(i);
        }
        if i == 0 {
            return None;
        }
        i -= 1;
    }
}

/// Topologically sorts `files` by their `dependency` edges. Only edges
/// pointing at another file in `files` count; external imports are assumed
/// satisfied. Order among equally-ready files is deterministic (by path).
pub fn topological_sort(files: Vec<ProtoFile>) -> Result<Vec<ProtoFile>> {
    let by_name: HashMap<String, ProtoFile> =
        files.into_iter().map(|f| (f.path.clone(), f)).collect();
    let all_names: HashSet<&str> = by_name.keys().map(String::as_str).collect();

    let mut remaining: HashMap<String, HashSet<String>> = by_name
        .iter()
        .map(|(name, file)| {
            let deps: HashSet<String> =
                file.dependencies.iter().filter(|d| all_names.contains(d.as_str())).cloned().collect();
            (name.clone(), deps)
        })
        .collect();

    let mut sorted_names = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let mut ready: Vec<String> =
            remaining.iter().filter(|(_, deps)| deps.is_empty()).map(|(n, _)| n.clone()).collect();
        if ready.is_empty() {
            return Err(Error::CircularDependency);
        }
        ready.sort();

        for name in &ready {
            remaining.remove(name);
        }
        for deps in remaining.values_mut() {
            for name in &ready {
                deps.remove(name);
            }
        }
        sorted_names.extend(ready);
    }

    let mut by_name = by_name;
    let mut sorted = Vec::with_capacity(sorted_names.len());
    for name in sorted_names {
        let file = by_name
            .remove(&name)
            .ok_or_else(|| Error::MissingDependency { path: name.clone() })?;
        sorted.push(file);
    }
    Ok(sorted)
}

/// Renders every file in `files` (assumed already topologically sorted) to
/// `.proto` source text, in order, so dependents see their dependencies'
/// names already valid.
pub fn render_all(files: &mut [ProtoFile]) {
    for file in files {
        file.rendered_source = Some(render_file(&file.descriptor));
    }
}

fn render_file(descriptor: &FileDescriptorProto) -> String {
    let mut out = String::new();
    let syntax = descriptor.syntax.as_deref().unwrap_or("proto2");
    let _ = writeln!(out, "syntax = \"{syntax}\";");

    for dependency in &descriptor.dependency {
        let _ = writeln!(out, "import \"{dependency}\";");
    }

    if let Some(package) = &descriptor.package {
        let _ = writeln!(out, "package {package};");
    }

    for message in &descriptor.message_type {
        render_message(&mut out, message, 0);
    }
    for enum_type in &descriptor.enum_type {
        render_enum(&mut out, enum_type, 0);
    }
    for service in &descriptor.service {
        render_service(&mut out, service, 0);
    }
    render_extensions(&mut out, &descriptor.extension, 0);

    out
}

/// Top-level `extend` blocks, grouped by extendee in declaration order.
fn render_extensions(out: &mut String, extensions: &[prost_types::FieldDescriptorProto], depth: usize) {
    let mut by_extendee: Vec<(&str, Vec<&prost_types::FieldDescriptorProto>)> = Vec::new();
    for field in extensions {
        let extendee = strip_leading_dot(field.extendee());
        match by_extendee.iter_mut().find(|(name, _)| *name == extendee) {
            Some((_, fields)) => fields.push(field),
            None => by_extendee.push((extendee, vec![field])),
        }
    }
    for (extendee, fields) in by_extendee {
        indent(out, depth);
        let _ = writeln!(out, "extend {extendee} {{");
        for field in fields {
            render_field(out, field, depth + 1);
        }
        indent(out, depth);
        out.push_str("}\n");
    }
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn strip_leading_dot(name: &str) -> &str {
    name.strip_prefix('.').unwrap_or(name)
}

fn render_message(out: &mut String, message: &DescriptorProto, depth: usize) {
    indent(out, depth);
    let _ = writeln!(out, "message {} {{", message.name());

    for enum_type in &message.enum_type {
        render_enum(out, enum_type, depth + 1);
    }
    for nested in &message.nested_type {
        render_message(out, nested, depth + 1);
    }
    for field in &message.field {
        render_field(out, field, depth + 1);
    }
    for range in &message.reserved_range {
        indent(out, depth + 1);
        let end = range.end.unwrap_or(range.start.unwrap_or(0));
        let _ = writeln!(out, "reserved {} to {};", range.start.unwrap_or(0), end - 1);
    }
    for ext_range in &message.extension_range {
        indent(out, depth + 1);
        let end = ext_range.end.unwrap_or(ext_range.start.unwrap_or(0));
        let _ = writeln!(out, "extensions {} to {};", ext_range.start.unwrap_or(0), end - 1);
    }
    render_extensions(out, &message.extension, depth + 1);

    indent(out, depth);
    out.push_str("}\n");
}

fn render_enum(out: &mut String, enum_type: &EnumDescriptorProto, depth: usize) {
    indent(out, depth);
    let _ = writeln!(out, "enum {} {{", enum_type.name());
    for value in &enum_type.value {
        indent(out, depth + 1);
        let _ = writeln!(out, "{} = {};", value.name(), value.number());
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn render_service(out: &mut String, service: &ServiceDescriptorProto, depth: usize) {
    indent(out, depth);
    let _ = writeln!(out, "service {} {{", service.name());
    for method in &service.method {
        indent(out, depth + 1);
        let _ = writeln!(
            out,
            "rpc {}({}) returns ({});",
            method.name(),
            strip_leading_dot(method.input_type()),
            strip_leading_dot(method.output_type())
        );
    }
    indent(out, depth);
    out.push_str("}\n");
}

fn render_field(out: &mut String, field: &prost_types::FieldDescriptorProto, depth: usize) {
    indent(out, depth);

    let label = match field.label() {
        Label::Optional => "optional",
        Label::Required => "required",
        Label::Repeated => "repeated",
    };

    let type_name = field_type_name(field);

    let mut options = Vec::new();
    if let Some(default) = &field.default_value {
        let is_string_type = matches!(field.r#type(), Type::String);
        if is_string_type {
            options.push(format!("default = \"{default}\""));
        } else {
            options.push(format!("default = {default}"));
        }
    }
    if field.options.as_ref().is_some_and(|o| o.deprecated()) {
        options.push("deprecated = true".to_string());
    }

    let options_suffix =
        if options.is_empty() { String::new() } else { format!(" [{}]", options.join(", ")) };

    let _ = writeln!(
        out,
        "{label} {type_name} {name} = {number}{options_suffix};",
        name = field.name(),
        number = field.number()
    );
}

fn field_type_name(field: &prost_types::FieldDescriptorProto) -> String {
    use Type::*;
    match field.r#type() {
        Double => "double".to_string(),
        Float => "float".to_string(),
        Int64 => "int64".to_string(),
        Uint64 => "uint64".to_string(),
        Int32 => "int32".to_string(),
        Fixed64 => "fixed64".to_string(),
        Fixed32 => "fixed32".to_string(),
        Bool => "bool".to_string(),
        String => "string".to_string(),
        Group => strip_leading_dot(field.type_name()).to_string(),
        Message => strip_leading_dot(field.type_name()).to_string(),
        Bytes => "bytes".to_string(),
        Uint32 => "uint32".to_string(),
        Enum => strip_leading_dot(field.type_name()).to_string(),
        Sfixed32 => "sfixed32".to_string(),
        Sfixed64 => "sfixed64".to_string(),
        Sint32 => "sint32".to_string(),
        Sint64 => "sint64".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::FieldDescriptorProto;

    fn encode(descriptor: &FileDescriptorProto) -> Vec<u8> {
        let mut buf = Vec::new();
        descriptor.encode(&mut buf).unwrap();
        buf
    }

    #[test]
    fn scans_single_embedded_descriptor() {
        let descriptor = FileDescriptorProto {
            name: Some("a.proto".to_string()),
            package: Some("pkg".to_string()),
            syntax: Some("proto3".to_string()),
            ..Default::default()
        };
        let mut blob = vec![0xDE, 0xAD, 0xBE, 0xEF];
        blob.extend(encode(&descriptor));
        blob.extend([0x00, 0x00]);

        let found = scan(&blob);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path, "a.proto");
    }

    #[test]
    fn drops_meta_schema_descriptor() {
        let descriptor = FileDescriptorProto {
            name: Some(DESCRIPTOR_PROTO_META_SCHEMA.to_string()),
            ..Default::default()
        };
        let blob = encode(&descriptor);
        assert!(scan(&blob).is_empty());
    }

    #[test]
    fn topological_sort_orders_dependency_before_dependent() {
        let a = ProtoFile {
            path: "a.proto".to_string(),
            dependencies: vec![],
            descriptor: FileDescriptorProto {
                name: Some("a.proto".to_string()),
                syntax: Some("proto2".to_string()),
                ..Default::default()
            },
            rendered_source: None,
        };
        let b = ProtoFile {
            path: "b.proto".to_string(),
            dependencies: vec!["a.proto".to_string()],
            descriptor: FileDescriptorProto {
                name: Some("b.proto".to_string()),
                dependency: vec!["a.proto".to_string()],
                ..Default::default()
            },
            rendered_source: None,
        };

        let sorted = topological_sort(vec![b, a]).unwrap();
        assert_eq!(sorted.iter().map(|f| f.path.as_str()).collect::<Vec<_>>(), vec!["a.proto", "b.proto"]);
    }

    #[test]
    fn topological_sort_detects_cycle() {
        let a = ProtoFile {
            path: "a.proto".to_string(),
            dependencies: vec!["b.proto".to_string()],
            descriptor: FileDescriptorProto {
                name: Some("a.proto".to_string()),
                dependency: vec!["b.proto".to_string()],
                ..Default::default()
            },
            rendered_source: None,
        };
        let b = ProtoFile {
            path: "b.proto".to_string(),
            dependencies: vec!["a.proto".to_string()],
            descriptor: FileDescriptorProto {
                name: Some("b.proto".to_string()),
                dependency: vec!["a.proto".to_string()],
                ..Default::default()
            },
            rendered_source: None,
        };

        let err = topological_sort(vec![a, b]).unwrap_err();
        assert!(matches!(err, Error::CircularDependency));
    }

    #[test]
    fn renders_syntax_import_package_and_message() {
        let mut descriptor = FileDescriptorProto {
            name: Some("b.proto".to_string()),
            package: Some("pkg".to_string()),
            dependency: vec!["a.proto".to_string()],
            syntax: Some("proto2".to_string()),
            ..Default::default()
        };
        descriptor.message_type.push(DescriptorProto {
            name: Some("Msg".to_string()),
            field: vec![FieldDescriptorProto {
                name: Some("id".to_string()),
                number: Some(1),
                label: Some(Label::Optional as i32),
                r#type: Some(Type::Int32 as i32),
                ..Default::default()
            }],
            ..Default::default()
        });

        let rendered = render_file(&descriptor);
        assert!(rendered.starts_with("syntax = \"proto2\";\n"));
        assert!(rendered.contains("import \"a.proto\";\n"));
        assert!(rendered.contains("package pkg;\n"));
        assert!(rendered.contains("message Msg {\n"));
        assert!(rendered.contains("optional int32 id = 1;"));
    }
}
