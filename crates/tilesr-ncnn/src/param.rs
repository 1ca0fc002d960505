//! Text `.param` topology parser.
//!
//! ```text
//! 7767517
//! <layer_count> <blob_count>
//! <type> <name> <n_in> <n_out> <in blobs...> <out blobs...> <k=v ...>
//! ```
//!
//! Values are ints or floats; keys `<= -23300` carry arrays for parameter
//! id `-(key + 23300)` written as `n,v0,v1,...`.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tilesr_core::error::{EngineError, Result};

/// First line of every text param file.
pub const PARAM_MAGIC: u32 = 7767517;

const ARRAY_KEY_BASE: i32 = -23300;

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Int(i32),
    Float(f32),
    Array(Vec<f32>),
}

/// `id → value` parameter dictionary of one layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamDict {
    values: HashMap<i32, ParamValue>,
}

impl ParamDict {
    pub fn int(&self, id: i32, default: i32) -> i32 {
        match self.values.get(&id) {
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) => *v as i32,
            _ => default,
        }
    }

    pub fn float(&self, id: i32, default: f32) -> f32 {
        match self.values.get(&id) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f32,
            _ => default,
        }
    }

    pub fn array(&self, id: i32) -> Option<&[f32]> {
        match self.values.get(&id) {
            Some(ParamValue::Array(v)) => Some(v),
            _ => None,
        }
    }

    pub fn contains(&self, id: i32) -> bool {
        self.values.contains_key(&id)
    }

    pub fn insert(&mut self, id: i32, value: ParamValue) {
        self.values.insert(id, value);
    }
}

/// One layer line.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerDecl {
    pub kind: String,
    pub name: String,
    pub bottoms: Vec<String>,
    pub tops: Vec<String>,
    pub params: ParamDict,
}

/// A parsed param file.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamFile {
    pub layers: Vec<LayerDecl>,
    /// Distinct blob names in definition order.
    pub blobs: Vec<String>,
}

/// Parse param text.  `path` is only used for error messages.
pub fn parse_param(text: &str, path: &Path) -> Result<ParamFile> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim()))
        .filter(|(_, l)| !l.is_empty());

    let (lineno, magic) = lines
        .next()
        .ok_or_else(|| EngineError::parse(path, "empty param file"))?;
    if magic.parse::<u32>().ok() != Some(PARAM_MAGIC) {
        return Err(EngineError::parse(
            path,
            format!("line {lineno}: bad magic {magic:?}, expected {PARAM_MAGIC}"),
        ));
    }

    let (lineno, counts) = lines
        .next()
        .ok_or_else(|| EngineError::parse(path, "missing layer/blob count line"))?;
    let mut it = counts.split_whitespace();
    let layer_count = parse_count(it.next(), path, lineno, "layer count")?;
    let blob_count = parse_count(it.next(), path, lineno, "blob count")?;
    if it.next().is_some() {
        return Err(EngineError::parse(
            path,
            format!("line {lineno}: trailing tokens after counts"),
        ));
    }

    let mut layers = Vec::with_capacity(layer_count);
    let mut blobs: Vec<String> = Vec::with_capacity(blob_count);
    let mut defined: HashSet<String> = HashSet::with_capacity(blob_count);

    for (lineno, line) in lines {
        if layers.len() == layer_count {
            return Err(EngineError::parse(
                path,
                format!("line {lineno}: more layers than the declared {layer_count}"),
            ));
        }
        let decl = parse_layer_line(line, path, lineno)?;

        for bottom in &decl.bottoms {
            if !defined.contains(bottom) {
                return Err(EngineError::parse(
                    path,
                    format!(
                        "line {lineno}: layer {:?} consumes undefined blob {bottom:?}",
                        decl.name
                    ),
                ));
            }
        }
        for top in &decl.tops {
            if !defined.insert(top.clone()) {
                return Err(EngineError::parse(
                    path,
                    format!("line {lineno}: blob {top:?} is produced twice"),
                ));
            }
            blobs.push(top.clone());
        }
        layers.push(decl);
    }

    if layers.len() != layer_count {
        return Err(EngineError::parse(
            path,
            format!(
                "declared {layer_count} layers but found {}",
                layers.len()
            ),
        ));
    }
    if blobs.len() != blob_count {
        return Err(EngineError::parse(
            path,
            format!("declared {blob_count} blobs but found {}", blobs.len()),
        ));
    }

    Ok(ParamFile { layers, blobs })
}

fn parse_count(tok: Option<&str>, path: &Path, lineno: usize, what: &str) -> Result<usize> {
    tok.and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(|| EngineError::parse(path, format!("line {lineno}: invalid {what}")))
}

fn parse_layer_line(line: &str, path: &Path, lineno: usize) -> Result<LayerDecl> {
    let mut toks = line.split_whitespace();
    let err = |msg: String| EngineError::parse(path, format!("line {lineno}: {msg}"));

    let kind = toks.next().ok_or_else(|| err("missing layer type".into()))?;
    let name = toks.next().ok_or_else(|| err("missing layer name".into()))?;
    let n_in = toks
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(|| err(format!("layer {name:?}: invalid input count")))?;
    let n_out = toks
        .next()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(|| err(format!("layer {name:?}: invalid output count")))?;

    let mut bottoms = Vec::with_capacity(n_in);
    for _ in 0..n_in {
        let b = toks
            .next()
            .ok_or_else(|| err(format!("layer {name:?}: expected {n_in} input blobs")))?;
        bottoms.push(b.to_string());
    }
    let mut tops = Vec::with_capacity(n_out);
    for _ in 0..n_out {
        let t = toks
            .next()
            .ok_or_else(|| err(format!("layer {name:?}: expected {n_out} output blobs")))?;
        tops.push(t.to_string());
    }

    let mut params = ParamDict::default();
    for kv in toks {
        let (k, v) = kv
            .split_once('=')
            .ok_or_else(|| err(format!("layer {name:?}: malformed param {kv:?}")))?;
        let key: i32 = k
            .parse()
            .map_err(|_| err(format!("layer {name:?}: malformed param key {k:?}")))?;
        if key <= ARRAY_KEY_BASE {
            let id = -(key - ARRAY_KEY_BASE);
            let values = parse_array(v)
                .ok_or_else(|| err(format!("layer {name:?}: malformed array param {kv:?}")))?;
            params.insert(id, ParamValue::Array(values));
        } else {
            let value = parse_scalar(v)
                .ok_or_else(|| err(format!("layer {name:?}: malformed param value {kv:?}")))?;
            params.insert(key, value);
        }
    }

    Ok(LayerDecl {
        kind: kind.to_string(),
        name: name.to_string(),
        bottoms,
        tops,
        params,
    })
}

fn parse_scalar(v: &str) -> Option<ParamValue> {
    if v.contains(['.', 'e', 'E']) {
        v.parse::<f32>().ok().map(ParamValue::Float)
    } else {
        v.parse::<i32>().ok().map(ParamValue::Int)
    }
}

fn parse_array(v: &str) -> Option<Vec<f32>> {
    let mut parts = v.split(',');
    let n: usize = parts.next()?.parse().ok()?;
    let values: Vec<f32> = parts
        .map(|p| p.parse::<f32>().ok())
        .collect::<Option<_>>()?;
    (values.len() == n).then_some(values)
}
