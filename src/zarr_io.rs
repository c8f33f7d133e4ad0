//! Zarr I/O operations
//!
//! Local Zarr v2 directory stores: metadata inspection, a lazy chunk-level
//! reader implementing [`LazyArray`], and a parallel chunked writer. Only
//! uncompressed C-order arrays are supported.

use crate::data_source::{default_dimension_names, narrow, narrow_mut, ArrayMetadata, LazyArray};
use crate::errors::{Result, SlicerError};
use crate::selection::Selector;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use log::{debug, info};
use ndarray::{ArrayD, Axis, IxDyn};
use rayon::prelude::*;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};

const ZARRAY: &str = ".zarray";
const ZATTRS: &str = ".zattrs";
const ZGROUP: &str = ".zgroup";
const DIMENSIONS_ATTR: &str = "_ARRAY_DIMENSIONS";
/// Chunk files read at once by a single fetch unless configured otherwise
const DEFAULT_READ_CONCURRENCY: usize = 16;

/// Zarr data source
#[derive(Debug, Clone)]
pub struct ZarrSource {
    /// Local filesystem path
    pub path: PathBuf,
}

impl ZarrSource {
    /// Create a new ZarrSource from a path string
    pub fn from_path_str(s: &str) -> Result<Self> {
        if s.starts_with("s3://") || s.starts_with("gs://") || s.starts_with("https://") {
            return Err(SlicerError::Generic(
                "Cloud storage is not supported. Please use local filesystem paths.".to_string(),
            ));
        }
        Ok(ZarrSource {
            path: PathBuf::from(s),
        })
    }
}

/// Element encoding of a chunk, parsed from a Zarr v2 `dtype` string such as `<f4`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChunkDtype {
    kind: char,
    size: usize,
    big_endian: bool,
}

impl ChunkDtype {
    fn parse(dtype: &str) -> Result<Self> {
        let unsupported = || SlicerError::ZarrError(format!("Unsupported dtype '{}'", dtype));

        let mut chars = dtype.chars();
        let big_endian = match chars.next() {
            Some('<') | Some('|') => false,
            Some('>') => true,
            _ => return Err(unsupported()),
        };
        let kind = chars.next().ok_or_else(unsupported)?;
        let size: usize = chars.as_str().parse().map_err(|_| unsupported())?;

        match (kind, size) {
            ('f', 4) | ('f', 8) | ('i', 1) | ('i', 2) | ('i', 4) | ('i', 8) | ('u', 1)
            | ('u', 2) | ('u', 4) | ('u', 8) => Ok(Self {
                kind,
                size,
                big_endian,
            }),
            _ => Err(unsupported()),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        if bytes.len() % self.size != 0 {
            return Err(SlicerError::ZarrError(format!(
                "Chunk of {} bytes is not a whole number of {}-byte elements",
                bytes.len(),
                self.size
            )));
        }
        Ok(bytes
            .chunks_exact(self.size)
            .map(|element| self.decode_element(element))
            .collect())
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn decode_element(&self, b: &[u8]) -> f32 {
        let be = self.big_endian;
        match (self.kind, self.size) {
            ('f', 4) => f32::from_le_bytes(le_word::<4>(b, be)),
            ('f', 8) => f64::from_le_bytes(le_word::<8>(b, be)) as f32,
            ('i', 1) => f32::from(i8::from_le_bytes(le_word::<1>(b, be))),
            ('i', 2) => f32::from(i16::from_le_bytes(le_word::<2>(b, be))),
            ('i', 4) => i32::from_le_bytes(le_word::<4>(b, be)) as f32,
            ('i', 8) => i64::from_le_bytes(le_word::<8>(b, be)) as f32,
            ('u', 1) => f32::from(b[0]),
            ('u', 2) => f32::from(u16::from_le_bytes(le_word::<2>(b, be))),
            ('u', 4) => u32::from_le_bytes(le_word::<4>(b, be)) as f32,
            _ => u64::from_le_bytes(le_word::<8>(b, be)) as f32,
        }
    }
}

/// Copy an element into a little-endian word
fn le_word<const N: usize>(bytes: &[u8], big_endian: bool) -> [u8; N] {
    let mut word = [0u8; N];
    word.copy_from_slice(&bytes[..N]);
    if big_endian {
        word.reverse();
    }
    word
}

#[allow(clippy::cast_possible_truncation)]
fn parse_fill_value(value: &JsonValue) -> Result<f32> {
    match value {
        JsonValue::Null => Ok(f32::NAN),
        JsonValue::Number(n) => n
            .as_f64()
            .map(|v| v as f32)
            .ok_or_else(|| SlicerError::ZarrError(format!("Invalid fill_value {}", n))),
        JsonValue::String(s) => match s.as_str() {
            "NaN" => Ok(f32::NAN),
            "Infinity" => Ok(f32::INFINITY),
            "-Infinity" => Ok(f32::NEG_INFINITY),
            _ => Err(SlicerError::ZarrError(format!("Invalid fill_value '{}'", s))),
        },
        other => Err(SlicerError::ZarrError(format!("Invalid fill_value {}", other))),
    }
}

fn parse_extents(metadata: &JsonValue, key: &str) -> Result<Vec<usize>> {
    metadata[key]
        .as_array()
        .ok_or_else(|| SlicerError::ZarrError(format!("Missing {} in metadata", key)))?
        .iter()
        .map(|v| {
            v.as_u64()
                .and_then(|n| usize::try_from(n).ok())
                .ok_or_else(|| SlicerError::ZarrError(format!("Invalid {} entry {}", key, v)))
        })
        .collect()
}

/// Every chunk-grid cell in the cartesian product of `ranges`, in C order
pub(crate) fn grid_cells(ranges: &[Range<usize>]) -> Vec<Vec<usize>> {
    if ranges.iter().any(|r| r.is_empty()) {
        return Vec::new();
    }
    let mut cells = Vec::new();
    let mut cell: Vec<usize> = ranges.iter().map(|r| r.start).collect();
    loop {
        cells.push(cell.clone());
        let mut axis = ranges.len();
        loop {
            if axis == 0 {
                return cells;
            }
            axis -= 1;
            cell[axis] += 1;
            if cell[axis] < ranges[axis].end {
                break;
            }
            cell[axis] = ranges[axis].start;
        }
    }
}

fn chunk_key(cell: &[usize], separator: &str) -> String {
    if cell.is_empty() {
        return "0".to_string();
    }
    cell.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

/// Global index range a chunk covers, clipped to `bounds`
fn chunk_overlap(cell: &[usize], chunks: &[usize], bounds: &[Range<usize>]) -> Vec<Range<usize>> {
    cell.iter()
        .zip(chunks)
        .zip(bounds)
        .map(|((&c, &size), bound)| {
            let origin = c * size;
            origin.max(bound.start)..(origin + size).min(bound.end)
        })
        .collect()
}

fn shift(ranges: &[Range<usize>], origin: &[usize]) -> Vec<Range<usize>> {
    ranges
        .iter()
        .zip(origin)
        .map(|(r, &o)| (r.start - o)..(r.end - o))
        .collect()
}

/// Zarr reader for accessing arrays in a store
pub struct ZarrReader {
    source: ZarrSource,
}

impl ZarrReader {
    /// Create a new ZarrReader from a source
    pub async fn new(source: ZarrSource) -> Result<Self> {
        if !source.path.exists() {
            return Err(SlicerError::ZarrError(format!(
                "Zarr store path does not exist: {:?}",
                source.path
            )));
        }

        if !source.path.is_dir() {
            return Err(SlicerError::ZarrError(format!(
                "Zarr store path is not a directory: {:?}",
                source.path
            )));
        }

        Ok(ZarrReader { source })
    }

    /// List all arrays in the Zarr store, sorted by name
    pub async fn list_arrays(&self) -> Result<Vec<String>> {
        let mut arrays = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.source.path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.join(ZARRAY).exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    arrays.push(name.to_string());
                }
            }
        }

        arrays.sort();
        Ok(arrays)
    }

    async fn read_metadata_json(&self, array_name: &str) -> Result<(JsonValue, HashMap<String, JsonValue>)> {
        let array_path = self.source.path.join(array_name);
        if !array_path.exists() {
            return Err(SlicerError::ArrayNotFound {
                array: array_name.to_string(),
            });
        }

        let zarray_path = array_path.join(ZARRAY);
        let content = match tokio::fs::read_to_string(&zarray_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SlicerError::ZarrError(format!(
                    "Array metadata file not found: {}",
                    zarray_path.display()
                )))
            }
            Err(e) => return Err(e.into()),
        };
        let metadata: JsonValue = serde_json::from_str(&content)
            .map_err(|e| SlicerError::ZarrError(format!("Failed to parse metadata: {}", e)))?;

        let attributes = match tokio::fs::read_to_string(array_path.join(ZATTRS)).await {
            Ok(content) => match serde_json::from_str::<JsonValue>(&content) {
                Ok(JsonValue::Object(map)) => map.into_iter().collect(),
                Ok(_) => {
                    return Err(SlicerError::ZarrError(
                        "Attributes file is not a JSON object".to_string(),
                    ))
                }
                Err(e) => {
                    return Err(SlicerError::ZarrError(format!(
                        "Failed to parse attributes: {}",
                        e
                    )))
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        Ok((metadata, attributes))
    }

    /// Get array metadata
    pub async fn get_array_metadata(&self, array_name: &str) -> Result<ArrayMetadata> {
        let (metadata, attributes) = self.read_metadata_json(array_name).await?;
        build_metadata(array_name, &metadata, attributes)
    }

    /// Open an array lazily; no chunk is read until [`LazyArray::fetch`] is called
    pub async fn open_array(&self, array_name: &str) -> Result<ZarrArray> {
        let (raw, attributes) = self.read_metadata_json(array_name).await?;
        let metadata = build_metadata(array_name, &raw, attributes)?;

        if raw["zarr_format"].as_u64() != Some(2) {
            return Err(SlicerError::ZarrError(format!(
                "Array '{}' is not a Zarr v2 array",
                array_name
            )));
        }
        if !raw["compressor"].is_null() {
            return Err(SlicerError::ZarrError(format!(
                "Array '{}' uses a compressor, only uncompressed chunks are supported",
                array_name
            )));
        }
        if raw["filters"].as_array().is_some_and(|f| !f.is_empty()) {
            return Err(SlicerError::ZarrError(format!(
                "Array '{}' uses filters, which are not supported",
                array_name
            )));
        }
        if raw["order"].as_str().unwrap_or("C") != "C" {
            return Err(SlicerError::ZarrError(format!(
                "Array '{}' is not stored in C order",
                array_name
            )));
        }
        if metadata.chunks.len() != metadata.shape.len() || metadata.chunks.contains(&0) {
            return Err(SlicerError::ZarrError(format!(
                "Array '{}' has an invalid chunk shape {:?}",
                array_name, metadata.chunks
            )));
        }

        let dtype = ChunkDtype::parse(&metadata.dtype)?;
        let fill_value = parse_fill_value(&raw["fill_value"])?;
        let separator = raw["dimension_separator"].as_str().unwrap_or(".").to_string();

        debug!(
            "Opened Zarr array '{}' shape={:?} chunks={:?} dtype={}",
            array_name, metadata.shape, metadata.chunks, metadata.dtype
        );

        Ok(ZarrArray {
            path: self.source.path.join(array_name),
            metadata,
            dtype,
            fill_value,
            separator,
            read_concurrency: DEFAULT_READ_CONCURRENCY,
        })
    }
}

fn build_metadata(
    array_name: &str,
    metadata: &JsonValue,
    attributes: HashMap<String, JsonValue>,
) -> Result<ArrayMetadata> {
    let shape = parse_extents(metadata, "shape")?;
    let chunks = parse_extents(metadata, "chunks")?;
    let dtype = metadata["dtype"].as_str().unwrap_or("unknown").to_string();

    let dimensions = attributes
        .get(DIMENSIONS_ATTR)
        .and_then(|v| v.as_array())
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect::<Vec<_>>()
        })
        .filter(|names| names.len() == shape.len())
        .unwrap_or_else(|| default_dimension_names(shape.len()));

    Ok(ArrayMetadata {
        name: array_name.to_string(),
        shape,
        dtype,
        chunks,
        dimensions,
        attributes,
    })
}

/// Lazily read Zarr array; fetches touch only the chunks covering a selector
#[derive(Debug, Clone)]
pub struct ZarrArray {
    path: PathBuf,
    metadata: ArrayMetadata,
    dtype: ChunkDtype,
    fill_value: f32,
    separator: String,
    read_concurrency: usize,
}

impl ZarrArray {
    /// Chunk shape of the array
    pub fn chunks(&self) -> &[usize] {
        &self.metadata.chunks
    }

    /// Limit the number of chunk files one fetch reads concurrently; zero is treated as one
    #[must_use]
    pub fn with_read_concurrency(mut self, limit: usize) -> Self {
        self.read_concurrency = limit.max(1);
        self
    }

    /// Upper bound on concurrent chunk reads per fetch
    pub fn read_concurrency(&self) -> usize {
        self.read_concurrency
    }

    /// Value used for chunks that are absent from the store
    pub fn fill_value(&self) -> f32 {
        self.fill_value
    }

    /// Directory holding the array's chunks
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and decode one chunk, `None` if the chunk was never written
    async fn read_chunk(&self, cell: &[usize]) -> Result<Option<ArrayD<f32>>> {
        let chunk_path = self.path.join(chunk_key(cell, &self.separator));
        let bytes = match tokio::fs::read(&chunk_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let values = self.dtype.decode(&bytes)?;
        let expected: usize = self.metadata.chunks.iter().product();
        if values.len() != expected {
            return Err(SlicerError::ZarrError(format!(
                "Chunk {} holds {} elements, expected {}",
                chunk_path.display(),
                values.len(),
                expected
            )));
        }
        Ok(Some(ArrayD::from_shape_vec(
            IxDyn(&self.metadata.chunks),
            values,
        )?))
    }
}

#[async_trait]
impl LazyArray for ZarrArray {
    fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    async fn fetch(&self, selector: &Selector) -> Result<ArrayD<f32>> {
        let shape = &self.metadata.shape;
        let chunks = &self.metadata.chunks;
        selector.validate(shape)?;

        let ranges = selector.ranges(shape);
        let origin: Vec<usize> = ranges.iter().map(|r| r.start).collect();
        let extents: Vec<usize> = ranges.iter().map(|r| r.len()).collect();
        let mut out = ArrayD::from_elem(IxDyn(&extents), self.fill_value);

        let grid: Vec<Range<usize>> = ranges
            .iter()
            .zip(chunks)
            .map(|(r, &c)| {
                if r.is_empty() {
                    0..0
                } else {
                    (r.start / c)..((r.end - 1) / c + 1)
                }
            })
            .collect();
        let cells = grid_cells(&grid);
        debug!(
            "Fetching {} from '{}': {} chunk(s)",
            selector,
            self.metadata.name,
            cells.len()
        );

        let reads: Vec<_> = cells.iter().map(|cell| self.read_chunk(cell)).collect();
        let decoded: Vec<Option<ArrayD<f32>>> = stream::iter(reads)
            .buffered(self.read_concurrency)
            .try_collect()
            .await?;

        for (cell, chunk) in cells.iter().zip(decoded) {
            let Some(chunk) = chunk else { continue };
            let overlap = chunk_overlap(cell, chunks, &ranges);
            let chunk_origin: Vec<usize> = cell.iter().zip(chunks).map(|(&c, &s)| c * s).collect();

            let mut src = chunk.view();
            narrow(&mut src, &shift(&overlap, &chunk_origin));
            let mut dst = out.view_mut();
            narrow_mut(&mut dst, &shift(&overlap, &origin));
            dst.assign(&src);
        }

        for (axis, _) in selector.index_axes_descending() {
            out = out.index_axis_move(Axis(axis), 0);
        }
        Ok(out)
    }
}

/// Zarr writer for creating new uncompressed Zarr v2 arrays
pub struct ZarrWriter {
    source: ZarrSource,
}

impl ZarrWriter {
    /// Create a new ZarrWriter from a source
    pub async fn new(source: ZarrSource) -> Result<Self> {
        tokio::fs::create_dir_all(&source.path).await?;
        let group = source.path.join(ZGROUP);
        if !group.exists() {
            tokio::fs::write(&group, serde_json::json!({ "zarr_format": 2 }).to_string()).await?;
        }
        Ok(ZarrWriter { source })
    }

    /// Write an ndarray to a Zarr array, one file per chunk
    ///
    /// Chunks are encoded and written in parallel. Edge chunks are padded with
    /// the fill value `0.0`.
    pub async fn write_array(
        &self,
        array_name: &str,
        data: &ArrayD<f32>,
        chunk_shape: Option<Vec<usize>>,
        attributes: Option<HashMap<String, JsonValue>>,
    ) -> Result<()> {
        let data_shape = data.shape().to_vec();
        let chunks = chunk_shape.unwrap_or_else(|| data_shape.iter().map(|&s| s.max(1)).collect());
        if chunks.len() != data_shape.len() || chunks.contains(&0) {
            return Err(SlicerError::ZarrError(format!(
                "Invalid chunk shape {:?} for data of shape {:?}",
                chunks, data_shape
            )));
        }

        info!(
            "Writing array '{}' shape={:?} chunks={:?}",
            array_name, data_shape, chunks
        );

        let array_path = self.source.path.join(array_name);
        tokio::fs::create_dir_all(&array_path).await?;

        let metadata = serde_json::json!({
            "chunks": chunks,
            "compressor": null,
            "dimension_separator": ".",
            "dtype": "<f4",
            "fill_value": 0.0,
            "filters": null,
            "order": "C",
            "shape": data_shape,
            "zarr_format": 2
        });
        let metadata = serde_json::to_string_pretty(&metadata)
            .map_err(|e| SlicerError::ZarrError(format!("Failed to encode metadata: {}", e)))?;
        tokio::fs::write(array_path.join(ZARRAY), metadata).await?;

        if let Some(attributes) = attributes {
            let attributes: serde_json::Map<String, JsonValue> = attributes.into_iter().collect();
            let encoded = serde_json::to_string_pretty(&JsonValue::Object(attributes))
                .map_err(|e| SlicerError::ZarrError(format!("Failed to encode attributes: {}", e)))?;
            tokio::fs::write(array_path.join(ZATTRS), encoded).await?;
        }

        let data = data.clone();
        let written = tokio::task::spawn_blocking(move || write_chunks(&array_path, &data, &chunks))
            .await
            .map_err(|e| SlicerError::Generic(format!("Chunk writer task failed: {}", e)))??;

        info!("Wrote array '{}' with {} chunks", array_name, written);
        Ok(())
    }
}

fn write_chunks(array_path: &Path, data: &ArrayD<f32>, chunks: &[usize]) -> Result<usize> {
    let shape = data.shape();
    let bounds: Vec<Range<usize>> = shape.iter().map(|&s| 0..s).collect();
    let grid: Vec<Range<usize>> = shape
        .iter()
        .zip(chunks)
        .map(|(&s, &c)| 0..s.div_ceil(c))
        .collect();
    let cells = if shape.is_empty() { vec![Vec::new()] } else { grid_cells(&grid) };

    cells.par_iter().try_for_each(|cell| {
        let overlap = chunk_overlap(cell, chunks, &bounds);
        let chunk_origin: Vec<usize> = cell.iter().zip(chunks).map(|(&c, &s)| c * s).collect();

        let mut src = data.view();
        narrow(&mut src, &overlap);
        let mut chunk = ArrayD::<f32>::zeros(IxDyn(chunks));
        let mut dst = chunk.view_mut();
        narrow_mut(&mut dst, &shift(&overlap, &chunk_origin));
        dst.assign(&src);

        let bytes: Vec<u8> = chunk.iter().flat_map(|f| f.to_le_bytes()).collect();
        std::fs::write(array_path.join(chunk_key(cell, ".")), bytes).map_err(SlicerError::IoError)
    })?;

    Ok(cells.len())
}

/// Open an array in a local Zarr store without reading any chunk
pub async fn open_zarr_array(path: &str, array_name: &str) -> Result<ZarrArray> {
    let source = ZarrSource::from_path_str(path)?;
    let reader = ZarrReader::new(source).await?;
    reader.open_array(array_name).await
}

/// Convenience function to write a Zarr array to a path
pub async fn write_zarr_array(
    path: &str,
    array_name: &str,
    data: &ArrayD<f32>,
    chunk_shape: Option<Vec<usize>>,
) -> Result<()> {
    let source = ZarrSource::from_path_str(path)?;
    let writer = ZarrWriter::new(source).await?;
    writer.write_array(array_name, data, chunk_shape, None).await
}

/// List all arrays in a Zarr store
pub async fn list_zarr_arrays(path: &str) -> Result<Vec<String>> {
    let source = ZarrSource::from_path_str(path)?;
    let reader = ZarrReader::new(source).await?;
    reader.list_arrays().await
}
