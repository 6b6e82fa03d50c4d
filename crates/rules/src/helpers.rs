//! `helpers` namespace available to cache and validation scripts.

use std::rc::Rc;

use kubelint_script::{arg, Namespace, ObjectMap, Value};

const DEFAULT_REGISTRY: &str = "docker.io";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry: String,
    pub repository: String,
    pub name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

/// Split `registry/repo/name:tag@digest`. A missing tag (and digest) means `latest`.
pub fn parse_image(image: &str) -> ImageRef {
    let (rest, digest) = match image.split_once('@') {
        Some((rest, digest)) => (rest, Some(digest.to_string())),
        None => (image, None),
    };
    let (path, tag) = match rest.rfind(':') {
        Some(i) if !rest[i + 1..].contains('/') => (&rest[..i], Some(rest[i + 1..].to_string())),
        _ => (rest, None),
    };
    let (registry, repository) = match path.split_once('/') {
        Some((first, remainder)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            (first.to_string(), remainder.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), path.to_string()),
    };
    let name = repository.rsplit('/').next().unwrap_or_default().to_string();
    let tag = match (tag, &digest) {
        (None, None) => Some("latest".to_string()),
        (tag, _) => tag,
    };
    ImageRef { registry, repository, name, tag, digest }
}

/// CPU quantity in millicores: `500m` = 500, `1.5` = 1500.
pub fn parse_cpu(value: &str) -> Option<f64> {
    let value = value.trim();
    match value.strip_suffix('m') {
        Some(milli) => milli.parse::<f64>().ok(),
        None => value.parse::<f64>().ok().map(|cores| cores * 1000.0),
    }
    .filter(|n| n.is_finite())
}

const MEMORY_SUFFIXES: [(&str, f64); 13] = [
    ("Ki", 1024.0),
    ("Mi", 1048576.0),
    ("Gi", 1073741824.0),
    ("Ti", 1099511627776.0),
    ("Pi", 1125899906842624.0),
    ("Ei", 1152921504606846976.0),
    ("k", 1e3),
    ("K", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Memory quantity in bytes: `128Mi`, `1G`, `512`.
pub fn parse_memory(value: &str) -> Option<f64> {
    let value = value.trim();
    for (suffix, factor) in MEMORY_SUFFIXES {
        if let Some(n) = value.strip_suffix(suffix) {
            return n.parse::<f64>().ok().map(|n| n * factor).filter(|n| n.is_finite());
        }
    }
    if let Some(n) = value.strip_suffix('m') {
        return n.parse::<f64>().ok().map(|n| n / 1000.0);
    }
    value.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn quantity(v: &Value, parse: fn(&str) -> Option<f64>) -> Value {
    match v {
        Value::Number(n) => Value::Number(*n),
        Value::String(s) => parse(s.as_ref()).map_or(Value::Null, Value::Number),
        _ => Value::Null,
    }
}

fn image_value(image: &ImageRef) -> Value {
    let opt = |s: &Option<String>| s.as_deref().map_or(Value::Null, Value::string);
    let mut map = ObjectMap::new();
    map.insert(Rc::from("registry"), Value::string(&image.registry));
    map.insert(Rc::from("repository"), Value::string(&image.repository));
    map.insert(Rc::from("name"), Value::string(&image.name));
    map.insert(Rc::from("tag"), opt(&image.tag));
    map.insert(Rc::from("digest"), opt(&image.digest));
    Value::object(map)
}

pub fn namespace() -> Value {
    let helpers = Namespace::new("helpers")
        .function("parseImage", |_, _, args| match arg(args, 0) {
            Value::String(s) => Ok(image_value(&parse_image(&s))),
            _ => Ok(Value::Null),
        })
        .function("parseCpu", |_, _, args| Ok(quantity(&arg(args, 0), parse_cpu)))
        .function("parseMemory", |_, _, args| Ok(quantity(&arg(args, 0), parse_memory)))
        .function("labelsToString", |interp, _, args| {
            let labels = arg(args, 0);
            let mut parts = Vec::new();
            for key in interp.enumerate_keys(&labels) {
                let v = interp.get_property(&labels, &key)?;
                parts.push(format!("{key}={}", v.to_display()));
            }
            Ok(Value::string(parts.join(",")))
        });
    Value::host(helpers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn images() {
        let img = parse_image("nginx");
        assert_eq!((img.registry.as_str(), img.repository.as_str(), img.tag.as_deref()), ("docker.io", "nginx", Some("latest")));
        let img = parse_image("quay.io/org/app:1.2");
        assert_eq!((img.registry.as_str(), img.repository.as_str(), img.name.as_str()), ("quay.io", "org/app", "app"));
        assert_eq!(img.tag.as_deref(), Some("1.2"));
        let img = parse_image("localhost:5000/app@sha256:abc");
        assert_eq!(img.registry, "localhost:5000");
        assert_eq!(img.tag, None);
        assert_eq!(img.digest.as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn quantities() {
        assert_eq!(parse_cpu("500m"), Some(500.0));
        assert_eq!(parse_cpu("1.5"), Some(1500.0));
        assert_eq!(parse_cpu("lots"), None);
        assert_eq!(parse_memory("128Mi"), Some(134217728.0));
        assert_eq!(parse_memory("1G"), Some(1e9));
        assert_eq!(parse_memory("512"), Some(512.0));
        assert_eq!(parse_memory("x"), None);
    }
}
