use ndarray::{ArrayD, Axis, IxDyn, Slice};
use serde_json::json;
use std::collections::HashMap;
use tempfile::tempdir;
use zslicer::errors::SlicerError;
use zslicer::selection::{AxisSelection, Selector};
use zslicer::zarr_io::{list_zarr_arrays, open_zarr_array, write_zarr_array, ZarrReader, ZarrSource, ZarrWriter};
use zslicer::LazyArray;

fn sample() -> ArrayD<f32> {
    let data: Vec<f32> = (0..120).map(|x| x as f32).collect();
    ArrayD::from_shape_vec(vec![6, 5, 4], data).unwrap()
}

#[tokio::test]
async fn test_write_then_fetch_partial_chunks() {
    let test_dir = tempdir().unwrap();
    let test_path = test_dir.path().to_str().unwrap();
    let source = ZarrSource::from_path_str(test_path).unwrap();
    let data = sample();

    // Chunk shape does not divide the array shape, so edge chunks are padded
    let writer = ZarrWriter::new(source.clone()).await.unwrap();
    writer
        .write_array("cube", &data, Some(vec![4, 2, 3]), None)
        .await
        .unwrap();

    let reader = ZarrReader::new(source).await.unwrap();
    let array = reader.open_array("cube").await.unwrap();
    assert_eq!(array.shape(), &[6, 5, 4]);
    assert_eq!(array.chunks(), &[4, 2, 3]);
    assert_eq!(array.dtype(), "<f4");

    let full = array.fetch(&Selector::full(3)).await.unwrap();
    assert_eq!(full, data);

    for z in [0, 3, 4, 5] {
        let slice = array.fetch(&Selector::full(3).with_index(0, z).unwrap()).await.unwrap();
        assert_eq!(slice, data.index_axis(Axis(0), z).to_owned());
    }

    let selector = Selector::new(vec![
        AxisSelection::Range(2, 6),
        AxisSelection::Index(3),
        AxisSelection::Range(1, 4),
    ]);
    let block = array.fetch(&selector).await.unwrap();
    let mut expected = data.view();
    expected.slice_axis_inplace(Axis(0), Slice::from(2..6));
    expected.slice_axis_inplace(Axis(2), Slice::from(1..4));
    let expected = expected.index_axis(Axis(1), 3).to_owned();
    assert_eq!(block, expected);

    assert!(matches!(
        array.fetch(&Selector::full(3).with_index(1, 5).unwrap()).await,
        Err(SlicerError::Range { axis: 1, .. })
    ));
}

#[tokio::test]
async fn test_missing_chunks_use_fill_value() {
    let test_dir = tempdir().unwrap();
    let test_path = test_dir.path().to_str().unwrap();
    let data = ArrayD::from_elem(vec![4, 4], 7.0_f32);
    write_zarr_array(test_path, "tiles", &data, Some(vec![2, 2])).await.unwrap();

    std::fs::remove_file(test_dir.path().join("tiles").join("0.1")).unwrap();

    let array = open_zarr_array(test_path, "tiles").await.unwrap();
    assert_eq!(array.fill_value(), 0.0);
    let full = array.fetch(&Selector::full(2)).await.unwrap();
    assert_eq!(full[[0, 1]], 7.0);
    assert_eq!(full[[0, 2]], 0.0);
    assert_eq!(full[[1, 3]], 0.0);
    assert_eq!(full[[2, 2]], 7.0);
}

#[tokio::test]
async fn test_fetch_reads_only_covering_chunks() {
    let test_dir = tempdir().unwrap();
    let test_path = test_dir.path().to_str().unwrap();
    let data = sample();
    write_zarr_array(test_path, "cube", &data, Some(vec![3, 5, 4])).await.unwrap();

    // Corrupt the second chunk along axis 0
    std::fs::write(test_dir.path().join("cube").join("1.0.0"), [1u8, 2, 3]).unwrap();

    let array = open_zarr_array(test_path, "cube").await.unwrap();
    let first = array.fetch(&Selector::full(3).with_index(0, 2).unwrap()).await.unwrap();
    assert_eq!(first, data.index_axis(Axis(0), 2).to_owned());

    let broken = array.fetch(&Selector::full(3).with_index(0, 4).unwrap()).await;
    assert!(matches!(broken, Err(SlicerError::ZarrError(_))));
}

#[tokio::test]
async fn test_bounded_chunk_reads_assemble_the_same_data() {
    let test_dir = tempdir().unwrap();
    let test_path = test_dir.path().to_str().unwrap();
    let data = sample();
    // 6 x 5 x 4 one-element chunks
    write_zarr_array(test_path, "fine", &data, Some(vec![1, 1, 1])).await.unwrap();

    let array = open_zarr_array(test_path, "fine").await.unwrap();
    assert_eq!(array.read_concurrency(), 16);
    let serial = array.clone().with_read_concurrency(0);
    assert_eq!(serial.read_concurrency(), 1);

    let selector = Selector::new(vec![
        AxisSelection::Range(1, 6),
        AxisSelection::Full,
        AxisSelection::Index(2),
    ]);
    let bounded = serial.fetch(&selector).await.unwrap();
    let default = array.fetch(&selector).await.unwrap();
    assert_eq!(bounded.shape(), &[5, 5]);
    assert_eq!(bounded, default);
    assert_eq!(bounded[[0, 0]], data[[1, 0, 2]]);
    assert_eq!(bounded[[4, 3]], data[[5, 3, 2]]);
}

#[tokio::test]
async fn test_metadata_and_listing() {
    let test_dir = tempdir().unwrap();
    let test_path = test_dir.path().to_str().unwrap();
    let source = ZarrSource::from_path_str(test_path).unwrap();

    let mut attributes = HashMap::new();
    attributes.insert("_ARRAY_DIMENSIONS".to_string(), json!(["z", "y", "x"]));
    attributes.insert("units".to_string(), json!("counts"));

    let writer = ZarrWriter::new(source.clone()).await.unwrap();
    writer
        .write_array("labels", &sample(), Some(vec![2, 5, 4]), Some(attributes))
        .await
        .unwrap();
    writer.write_array("image", &sample(), None, None).await.unwrap();

    assert_eq!(list_zarr_arrays(test_path).await.unwrap(), vec!["image", "labels"]);

    let reader = ZarrReader::new(source).await.unwrap();
    let metadata = reader.get_array_metadata("labels").await.unwrap();
    assert_eq!(metadata.dimensions, vec!["z", "y", "x"]);
    assert_eq!(metadata.axis_of("x"), Some(2));
    assert_eq!(metadata.attributes["units"], json!("counts"));

    let image = reader.get_array_metadata("image").await.unwrap();
    assert_eq!(image.dimensions, vec!["dim_0", "dim_1", "dim_2"]);
    assert_eq!(image.chunks, vec![6, 5, 4]);

    assert!(matches!(
        reader.get_array_metadata("missing").await,
        Err(SlicerError::ArrayNotFound { .. })
    ));
}

#[test]
fn test_rejects_cloud_and_missing_stores() {
    assert!(ZarrSource::from_path_str("s3://bucket/volume.zarr").is_err());
    assert!(ZarrSource::from_path_str("gs://bucket/volume.zarr").is_err());

    let source = ZarrSource::from_path_str("/definitely/not/a/store").unwrap();
    let reader = tokio_test::block_on(ZarrReader::new(source));
    assert!(matches!(reader, Err(SlicerError::ZarrError(_))));
}

fn write_raw_array(root: &std::path::Path, name: &str, zarray: serde_json::Value, chunks: &[(&str, Vec<u8>)]) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(".zarray"), zarray.to_string()).unwrap();
    for (key, bytes) in chunks {
        std::fs::write(dir.join(key), bytes).unwrap();
    }
}

#[tokio::test]
async fn test_decodes_other_dtypes() {
    let test_dir = tempdir().unwrap();
    let root = test_dir.path();

    let ints: Vec<u8> = [-3i16, 0, 5, 1000].iter().flat_map(|v| v.to_le_bytes()).collect();
    write_raw_array(
        root,
        "ints",
        json!({
            "zarr_format": 2, "shape": [2, 2], "chunks": [2, 2], "dtype": "<i2",
            "compressor": null, "fill_value": 0, "filters": null, "order": "C"
        }),
        &[("0.0", ints)],
    );

    let doubles: Vec<u8> = [1.5f64, -2.25].iter().flat_map(|v| v.to_be_bytes()).collect();
    write_raw_array(
        root,
        "doubles",
        json!({
            "zarr_format": 2, "shape": [4], "chunks": [2], "dtype": ">f8",
            "compressor": null, "fill_value": "NaN", "filters": null, "order": "C",
            "dimension_separator": "/"
        }),
        &[("0", doubles)],
    );

    let path = root.to_str().unwrap();
    let ints = open_zarr_array(path, "ints").await.unwrap();
    let values = ints.fetch(&Selector::full(2)).await.unwrap();
    assert_eq!(values.iter().copied().collect::<Vec<_>>(), vec![-3.0, 0.0, 5.0, 1000.0]);

    let doubles = open_zarr_array(path, "doubles").await.unwrap();
    let values = doubles.fetch(&Selector::full(1)).await.unwrap();
    assert_eq!(values[[0]], 1.5);
    assert_eq!(values[[1]], -2.25);
    // Chunk 1 was never written
    assert!(values[[2]].is_nan());
    assert!(values[[3]].is_nan());
    assert_eq!(values.raw_dim(), IxDyn(&[4]));
}

#[tokio::test]
async fn test_rejects_unsupported_encodings() {
    let test_dir = tempdir().unwrap();
    let root = test_dir.path();
    write_raw_array(
        root,
        "blosc",
        json!({
            "zarr_format": 2, "shape": [4], "chunks": [2], "dtype": "<f4",
            "compressor": {"id": "blosc", "cname": "lz4", "clevel": 5, "shuffle": 1},
            "fill_value": 0.0, "filters": null, "order": "C"
        }),
        &[],
    );
    write_raw_array(
        root,
        "fortran",
        json!({
            "zarr_format": 2, "shape": [4], "chunks": [2], "dtype": "<f4",
            "compressor": null, "fill_value": 0.0, "filters": null, "order": "F"
        }),
        &[],
    );
    write_raw_array(
        root,
        "complex",
        json!({
            "zarr_format": 2, "shape": [4], "chunks": [2], "dtype": "<c8",
            "compressor": null, "fill_value": 0.0, "filters": null, "order": "C"
        }),
        &[],
    );

    let path = root.to_str().unwrap();
    for name in ["blosc", "fortran", "complex"] {
        assert!(
            matches!(open_zarr_array(path, name).await, Err(SlicerError::ZarrError(_))),
            "{} should be rejected",
            name
        );
    }
}
