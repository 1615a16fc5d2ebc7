// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Minimal PCD (Point Cloud Data, v0.7) reader and writer.
//!
//! Supports `DATA ascii` and `DATA binary` with any field layout, as long as
//! the cloud carries floating point `x`, `y` and `z` fields. Other fields
//! (intensity, ring, timestamp, ...) are skipped by their declared size.
//! `binary_compressed` is not supported.

use crate::lidar::{Error, PointCloud};
use std::{io::Write, path::Path};
use tracing::{debug, instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DataKind {
    Ascii,
    Binary,
}

#[derive(Clone, Debug)]
struct Field {
    name: String,
    size: usize,
    kind: u8,
    count: usize,
}

/// Byte offset and width of one coordinate inside a binary record, or its
/// token index inside an ascii line.
#[derive(Clone, Copy, Debug)]
struct Coord {
    offset: usize,
    token: usize,
    size: usize,
}

#[derive(Debug)]
struct Header {
    fields: Vec<Field>,
    points: usize,
    data: DataKind,
    /// Byte offset of the first data byte.
    body: usize,
}

impl Header {
    fn coord(&self, name: &str) -> Result<Coord, Error> {
        let mut offset = 0;
        let mut token = 0;
        for f in &self.fields {
            if f.name == name {
                if f.kind != b'F' || !(f.size == 4 || f.size == 8) || f.count == 0 {
                    return Err(Error::Pcd(format!(
                        "field {name} must be F4 or F8, found {}{} x{}",
                        f.kind as char, f.size, f.count
                    )));
                }
                return Ok(Coord {
                    offset,
                    token,
                    size: f.size,
                });
            }
            offset = f.size.saturating_mul(f.count).saturating_add(offset);
            token = f.count.saturating_add(token);
        }
        Err(Error::Pcd(format!("missing field {name}")))
    }

    fn point_step(&self) -> Result<usize, Error> {
        self.fields
            .iter()
            .try_fold(0usize, |acc, f| {
                f.size.checked_mul(f.count).and_then(|b| acc.checked_add(b))
            })
            .ok_or_else(|| Error::Pcd("record size overflows".into()))
    }
}

/// Read a PCD file from disk.
#[instrument(skip_all, fields(path = %path.as_ref().display()))]
pub fn read_pcd_file(path: impl AsRef<Path>) -> Result<PointCloud, Error> {
    let bytes = std::fs::read(path.as_ref())?;
    let cloud = parse_pcd(&bytes)?;
    debug!(n = cloud.len(), "loaded pcd");
    Ok(cloud)
}

/// Decode a PCD document held in memory.
pub fn parse_pcd(bytes: &[u8]) -> Result<PointCloud, Error> {
    let header = parse_header(bytes)?;
    let xyz = [header.coord("x")?, header.coord("y")?, header.coord("z")?];
    let body = &bytes[header.body..];
    match header.data {
        DataKind::Ascii => parse_ascii(body, header.points, &xyz),
        DataKind::Binary => parse_binary(body, header.points, header.point_step()?, &xyz),
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, Error> {
    let mut names: Vec<String> = Vec::new();
    let mut sizes: Vec<usize> = Vec::new();
    let mut kinds: Vec<u8> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    let mut width = None;
    let mut height = None;
    let mut points = None;

    let mut pos = 0;
    while pos < bytes.len() {
        let end = bytes[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(bytes.len(), |i| pos + i);
        let line = std::str::from_utf8(&bytes[pos..end])
            .map_err(|_| Error::Pcd("header is not valid UTF-8".into()))?
            .trim();
        pos = (end + 1).min(bytes.len());

        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut tokens = line.split_whitespace();
        let key = tokens.next().unwrap_or_default().to_ascii_uppercase();
        let values: Vec<&str> = tokens.collect();

        match key.as_str() {
            "VERSION" | "VIEWPOINT" => {}
            "FIELDS" => names = values.iter().map(|s| s.to_string()).collect(),
            "SIZE" => sizes = parse_list(&key, &values)?,
            "COUNT" => counts = parse_list(&key, &values)?,
            "TYPE" => {
                kinds = values
                    .iter()
                    .map(|s| match s.as_bytes() {
                        [k @ (b'F' | b'I' | b'U')] => Ok(*k),
                        _ => Err(Error::Pcd(format!("unknown TYPE {s}"))),
                    })
                    .collect::<Result<_, _>>()?
            }
            "WIDTH" => width = Some(parse_one(&key, &values)?),
            "HEIGHT" => height = Some(parse_one(&key, &values)?),
            "POINTS" => points = Some(parse_one(&key, &values)?),
            "DATA" => {
                let data = match values.first().copied() {
                    Some("ascii") => DataKind::Ascii,
                    Some("binary") => DataKind::Binary,
                    Some(other) => {
                        return Err(Error::Pcd(format!("unsupported DATA encoding {other}")));
                    }
                    None => return Err(Error::Pcd("DATA line without encoding".into())),
                };

                if counts.is_empty() {
                    counts = vec![1; names.len()];
                }
                if names.is_empty() || sizes.len() != names.len() || kinds.len() != names.len() {
                    return Err(Error::Pcd(format!(
                        "FIELDS ({}), SIZE ({}) and TYPE ({}) disagree",
                        names.len(),
                        sizes.len(),
                        kinds.len()
                    )));
                }
                if counts.len() != names.len() {
                    return Err(Error::Pcd("COUNT does not match FIELDS".into()));
                }

                let points = match points {
                    Some(n) => n,
                    None => width
                        .unwrap_or(0usize)
                        .checked_mul(height.unwrap_or(1))
                        .ok_or_else(|| Error::Pcd("WIDTH × HEIGHT overflows".into()))?,
                };
                let fields = names
                    .into_iter()
                    .zip(sizes)
                    .zip(kinds)
                    .zip(counts)
                    .map(|(((name, size), kind), count)| Field {
                        name,
                        size,
                        kind,
                        count,
                    })
                    .collect();
                return Ok(Header {
                    fields,
                    points,
                    data,
                    body: pos,
                });
            }
            _ => return Err(Error::Pcd(format!("unknown header entry {key}"))),
        }
    }
    Err(Error::Pcd("missing DATA line".into()))
}

fn parse_list(key: &str, values: &[&str]) -> Result<Vec<usize>, Error> {
    values
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|_| Error::Pcd(format!("{key}: cannot parse {s:?}")))
        })
        .collect()
}

fn parse_one(key: &str, values: &[&str]) -> Result<usize, Error> {
    match values {
        [v] => v
            .parse()
            .map_err(|_| Error::Pcd(format!("{key}: cannot parse {v:?}"))),
        _ => Err(Error::Pcd(format!("{key} expects one value"))),
    }
}

fn parse_ascii(body: &[u8], points: usize, xyz: &[Coord; 3]) -> Result<PointCloud, Error> {
    let text =
        std::str::from_utf8(body).map_err(|_| Error::Pcd("ascii data is not valid UTF-8".into()))?;
    // Each point needs at least two bytes of text
    let mut cloud = PointCloud::with_capacity(points.min(body.len() / 2));
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());

    for row in 0..points {
        let line = lines
            .next()
            .ok_or_else(|| Error::Pcd(format!("expected {points} points, found {row}")))?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let mut v = [0.0f32; 3];
        for (axis, c) in xyz.iter().enumerate() {
            let token = tokens
                .get(c.token)
                .ok_or_else(|| Error::Pcd(format!("point {row}: too few values")))?;
            v[axis] = token
                .parse()
                .map_err(|_| Error::Pcd(format!("point {row}: cannot parse {token:?}")))?;
        }
        cloud.x.push(v[0]);
        cloud.y.push(v[1]);
        cloud.z.push(v[2]);
    }
    Ok(cloud)
}

fn parse_binary(
    body: &[u8],
    points: usize,
    step: usize,
    xyz: &[Coord; 3],
) -> Result<PointCloud, Error> {
    let needed = points.checked_mul(step).ok_or_else(|| {
        Error::Pcd(format!("{points} points of {step} bytes overflow"))
    })?;
    if body.len() < needed {
        return Err(Error::Pcd(format!(
            "binary data truncated: need {needed} bytes, have {}",
            body.len()
        )));
    }

    let mut cloud = PointCloud::with_capacity(points);
    for record in body[..needed].chunks_exact(step) {
        cloud.x.push(read_float(record, xyz[0]));
        cloud.y.push(read_float(record, xyz[1]));
        cloud.z.push(read_float(record, xyz[2]));
    }
    Ok(cloud)
}

#[inline]
fn read_float(record: &[u8], c: Coord) -> f32 {
    let b = &record[c.offset..c.offset + c.size];
    match b {
        [a0, a1, a2, a3] => f32::from_le_bytes([*a0, *a1, *a2, *a3]),
        _ => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(b);
            f64::from_le_bytes(raw) as f32
        }
    }
}

/// Write `cloud` as a binary PCD with `x y z` F4 fields.
pub fn write_pcd_binary<W: Write>(cloud: &PointCloud, mut out: W) -> Result<(), Error> {
    let n = cloud.len();
    write!(
        out,
        "# .PCD v0.7 - Point Cloud Data file format\n\
         VERSION 0.7\n\
         FIELDS x y z\n\
         SIZE 4 4 4\n\
         TYPE F F F\n\
         COUNT 1 1 1\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA binary\n"
    )?;
    let mut data = Vec::with_capacity(n * 12);
    for p in cloud.iter() {
        data.extend_from_slice(&p.x.to_le_bytes());
        data.extend_from_slice(&p.y.to_le_bytes());
        data.extend_from_slice(&p.z.to_le_bytes());
    }
    out.write_all(&data)?;
    Ok(())
}
