//! Common test utilities and helpers for integration tests.
#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use tlc_ingest::config::{Settings, Target};

pub const CSV_HEADER: &str = "VendorID,tpep_pickup_datetime,tpep_dropoff_datetime,passenger_count,trip_distance,PULocationID,DOLocationID,fare_amount,store_and_fwd_flag\n";

/// Settings writing to a Parquet store under `root`.
pub fn parquet_settings(root: &Path) -> Settings {
	Settings {
		target: Target::Parquet,
		out_dir: root.join("warehouse"),
		cache_dir: root.join("cache"),
		table: "trips".to_string(),
		..Settings::default()
	}
}

/// Write a yellow-taxi style CSV with `rows` data rows.
pub fn write_trip_csv(path: &Path, rows: usize) -> PathBuf {
	let mut body = String::with_capacity(CSV_HEADER.len() + rows * 80);
	body.push_str(CSV_HEADER);
	for i in 0..rows {
		body.push_str(&format!(
			"{},2021-01-01 00:{:02}:{:02},2021-01-01 01:00:00,{},{}.25,{},{},{}.5,N\n",
			i % 2 + 1,
			(i / 60) % 60,
			i % 60,
			i % 6,
			i % 30,
			i % 265 + 1,
			(i + 7) % 265 + 1,
			i % 50
		));
	}
	fs::write(path, body).expect("write csv");
	path.to_path_buf()
}

/// Parquet file bytes with `rows` rows of a small trip schema.
pub fn trip_parquet_bytes(rows: usize, first_id: i64) -> Vec<u8> {
	let schema = Arc::new(Schema::new(vec![
		Field::new("VendorID", DataType::Int64, true),
		Field::new("fare_amount", DataType::Float64, true),
		Field::new("store_and_fwd_flag", DataType::Utf8, true),
	]));
	let ids: ArrayRef = Arc::new(Int64Array::from_iter_values(
		(0..rows as i64).map(|i| first_id + i),
	));
	let fares: ArrayRef = Arc::new(Float64Array::from_iter_values(
		(0..rows).map(|i| i as f64 * 1.5),
	));
	let flags: ArrayRef = Arc::new(StringArray::from_iter_values((0..rows).map(|_| "N")));
	let batch = RecordBatch::try_new(schema.clone(), vec![ids, fares, flags]).expect("batch");

	let mut buf = Vec::new();
	let mut writer = ArrowWriter::try_new(&mut buf, schema, None).expect("writer");
	writer.write(&batch).expect("write batch");
	writer.close().expect("close writer");
	buf
}

pub fn write_trip_parquet(path: &Path, rows: usize, first_id: i64) -> PathBuf {
	fs::write(path, trip_parquet_bytes(rows, first_id)).expect("write parquet");
	path.to_path_buf()
}

/// Serve exactly one HTTP response on a local port, then close.
/// Returns the base URL (`http://127.0.0.1:{port}`) and the server task.
pub async fn serve_once(status: u16, body: Vec<u8>) -> (String, JoinHandle<()>) {
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
	let addr = listener.local_addr().expect("local addr");
	let handle = tokio::spawn(async move {
		let Ok((mut socket, _)) = listener.accept().await else {
			return;
		};
		let mut request = Vec::new();
		let mut buf = [0u8; 1024];
		while !request.windows(4).any(|w| w == b"\r\n\r\n") {
			match socket.read(&mut buf).await {
				Ok(0) | Err(_) => break,
				Ok(n) => request.extend_from_slice(&buf[..n]),
			}
		}
		let head = format!(
			"HTTP/1.1 {} Test\r\nContent-Length: {}\r\nContent-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
			status,
			body.len()
		);
		let _ = socket.write_all(head.as_bytes()).await;
		let _ = socket.write_all(&body).await;
		let _ = socket.shutdown().await;
	});
	(format!("http://{}", addr), handle)
}
