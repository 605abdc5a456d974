//! Fixed catalog of tools the model may invoke during answer generation.
//!
//! Every handler validates its arguments by typed deserialization, returns a
//! structured result map on success, and converts any internal failure into
//! an `{"error": ...}` payload. Nothing here propagates an error to the
//! caller: tool failures are conversation data, not crashes.

use std::cmp::Ordering;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use color_eyre::{
	Result,
	eyre::{bail, eyre},
};
use reqwest::header::CONTENT_TYPE;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::config::RENDER_TIMEOUT;

/// Shared, stateless context for handlers that need the network.
#[derive(Clone)]
pub struct ToolContext {
	pub http: reqwest::Client,
	pub chart_backend_url: String,
}

/// Tool declarations in the chat-completions `tools` wire shape.
pub fn tool_specs() -> Value {
	json!([
		{
			"type": "function",
			"function": {
				"name": "scrape_url",
				"description": "Scrape a URL and extract its content. Use this for web scraping tasks.",
				"parameters": {
					"type": "object",
					"properties": {
						"url": { "type": "string", "description": "The URL to scrape" }
					},
					"required": ["url"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "download_file",
				"description": "Download a file from a URL. Returns file info and base64 content if small enough.",
				"parameters": {
					"type": "object",
					"properties": {
						"url": { "type": "string", "description": "The URL of the file to download" }
					},
					"required": ["url"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "process_pdf",
				"description": "Process a PDF file from base64 content. Extracts text and metadata.",
				"parameters": {
					"type": "object",
					"properties": {
						"base64_content": { "type": "string", "description": "Base64 encoded PDF content" }
					},
					"required": ["base64_content"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "process_csv",
				"description": "Process a CSV file from base64 content. Returns table info and summary.",
				"parameters": {
					"type": "object",
					"properties": {
						"base64_content": { "type": "string", "description": "Base64 encoded CSV content" }
					},
					"required": ["base64_content"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "process_image",
				"description": "Process an image from base64 content. Returns image metadata.",
				"parameters": {
					"type": "object",
					"properties": {
						"base64_content": { "type": "string", "description": "Base64 encoded image content (with or without data URI prefix)" }
					},
					"required": ["base64_content"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "analyze_dataframe",
				"description": "Perform data analysis operations on tabular data (sum, mean, count, filter, groupby, sort).",
				"parameters": {
					"type": "object",
					"properties": {
						"data": { "type": "array", "description": "List of objects representing rows", "items": { "type": "object" } },
						"operation": { "type": "string", "enum": ["sum", "mean", "count", "filter", "groupby", "sort"], "description": "The operation to perform" },
						"column": { "type": "string", "description": "Column name for operations like sum, mean, sort" },
						"by": { "type": "string", "description": "Column name for groupby operation" },
						"agg": { "type": "string", "description": "Aggregation function for groupby (default: count)" },
						"ascending": { "type": "boolean", "description": "Sort order (default: true)" }
					},
					"required": ["data", "operation"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "calculate_statistics",
				"description": "Calculate statistics (count, mean, std, min, max, median, sum) for a numeric column.",
				"parameters": {
					"type": "object",
					"properties": {
						"data": { "type": "array", "description": "List of objects representing rows", "items": { "type": "object" } },
						"column": { "type": "string", "description": "Column name to analyze" }
					},
					"required": ["data", "column"]
				}
			}
		},
		{
			"type": "function",
			"function": {
				"name": "create_chart",
				"description": "Create a chart (bar, line, scatter, pie) from data. Returns base64 encoded image.",
				"parameters": {
					"type": "object",
					"properties": {
						"data": { "type": "array", "description": "List of objects representing rows", "items": { "type": "object" } },
						"chart_type": { "type": "string", "enum": ["bar", "line", "scatter", "pie"], "description": "Type of chart to create" },
						"x": { "type": "string", "description": "X-axis column name" },
						"y": { "type": "string", "description": "Y-axis column name" },
						"title": { "type": "string", "description": "Chart title" }
					},
					"required": ["data", "chart_type", "x", "y"]
				}
			}
		}
	])
}

/// Invoke a tool by name. Unknown names and handler failures come back as
/// `{"error": ...}` payloads; this function never fails.
pub async fn dispatch(ctx: &ToolContext, name: &str, args: Value) -> Value {
	let result = match name {
		"scrape_url" => scrape_url(args).await,
		"download_file" => download_file(ctx, args).await,
		"process_pdf" => process_pdf(args),
		"process_csv" => process_csv(args),
		"process_image" => process_image(args),
		"analyze_dataframe" => analyze_dataframe(args),
		"calculate_statistics" => calculate_statistics(args),
		"create_chart" => create_chart(ctx, args).await,
		_ => Err(eyre!("Unknown function: {name}")),
	};
	match result {
		Ok(value) => value,
		Err(e) => {
			tracing::error!(tool = name, "tool failed: {e}");
			json!({ "error": e.to_string() })
		}
	}
}

fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
	serde_json::from_value(args).map_err(|e| eyre!("invalid arguments: {e}"))
}

#[derive(Debug, Deserialize)]
struct UrlArgs {
	url: String,
}

#[derive(Debug, Deserialize)]
struct Base64Args {
	base64_content: String,
}

#[derive(Debug, Deserialize)]
struct AnalyzeArgs {
	data: Vec<Map<String, Value>>,
	operation: String,
	#[serde(default)]
	column: Option<String>,
	#[serde(default)]
	by: Option<String>,
	#[serde(default)]
	agg: Option<String>,
	#[serde(default)]
	ascending: Option<bool>,
	/// Extra keys become equality conditions for the `filter` operation
	#[serde(flatten)]
	extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct StatisticsArgs {
	data: Vec<Map<String, Value>>,
	column: String,
}

#[derive(Debug, Deserialize)]
struct ChartArgs {
	data: Vec<Map<String, Value>>,
	chart_type: String,
	x: String,
	y: String,
	#[serde(default)]
	title: Option<String>,
}

async fn scrape_url(args: Value) -> Result<Value> {
	let UrlArgs { url } = parse_args(args)?;
	let rendered = crate::browser::render(&url, RENDER_TIMEOUT).await?;
	let links = extract_links(&rendered.html, 100);
	let html_head: String = rendered.html.chars().take(10_000).collect();
	Ok(json!({ "text": rendered.text, "html": html_head, "links": links }))
}

fn extract_links(html: &str, cap: usize) -> Vec<String> {
	let doc = Html::parse_document(html);
	let Ok(sel) = Selector::parse("a[href]") else { return Vec::new() };
	doc.select(&sel).filter_map(|a| a.value().attr("href")).map(str::to_string).take(cap).collect()
}

async fn download_file(ctx: &ToolContext, args: Value) -> Result<Value> {
	let UrlArgs { url } = parse_args(args)?;
	let response = ctx
		.http
		.get(&url)
		.timeout(Duration::from_secs(60))
		.send()
		.await
		.map_err(|e| eyre!("download failed: {e}"))?
		.error_for_status()
		.map_err(|e| eyre!("download failed: {e}"))?;

	let content_type = response
		.headers()
		.get(CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("application/octet-stream")
		.to_string();
	let content = response.bytes().await.map_err(|e| eyre!("download body failed: {e}"))?;

	let mut result = json!({ "url": url, "content_type": content_type, "size": content.len() });
	if content.len() < 10 * 1024 * 1024 {
		result["base64"] = Value::String(BASE64.encode(&content));
	} else {
		result["note"] = Value::String("File too large for base64 encoding".into());
	}
	Ok(result)
}

fn process_pdf(args: Value) -> Result<Value> {
	let Base64Args { base64_content } = parse_args(args)?;
	let bytes = BASE64.decode(base64_content.trim().as_bytes()).map_err(|e| eyre!("invalid base64: {e}"))?;
	let text = pdf_extract::extract_text_from_mem(&bytes).map_err(|e| eyre!("failed to extract pdf text: {e}"))?;
	Ok(json!({ "text": text, "chars": text.len() }))
}

fn process_csv(args: Value) -> Result<Value> {
	let Base64Args { base64_content } = parse_args(args)?;
	let bytes = BASE64.decode(base64_content.trim().as_bytes()).map_err(|e| eyre!("invalid base64: {e}"))?;

	let mut reader = csv::Reader::from_reader(bytes.as_slice());
	let columns: Vec<String> = reader.headers().map_err(|e| eyre!("invalid csv: {e}"))?.iter().map(str::to_string).collect();

	let mut rows = 0usize;
	let mut head = Vec::new();
	for record in reader.records() {
		let record = record.map_err(|e| eyre!("invalid csv record: {e}"))?;
		if head.len() < 10 {
			let mut row = Map::new();
			for (name, field) in columns.iter().zip(record.iter()) {
				row.insert(name.clone(), coerce_scalar(field));
			}
			head.push(Value::Object(row));
		}
		rows += 1;
	}
	Ok(json!({ "columns": columns, "rows": rows, "head": head }))
}

/// Surface numeric-looking CSV fields as JSON numbers
fn coerce_scalar(field: &str) -> Value {
	if let Ok(i) = field.parse::<i64>() {
		return Value::Number(i.into());
	}
	if let Ok(f) = field.parse::<f64>() {
		if let Some(n) = serde_json::Number::from_f64(f) {
			return Value::Number(n);
		}
	}
	Value::String(field.to_string())
}

fn process_image(args: Value) -> Result<Value> {
	let Base64Args { base64_content } = parse_args(args)?;
	// Tolerate a data URI prefix
	let encoded = base64_content.split_once(',').map(|(_, rest)| rest).unwrap_or(&base64_content);
	let bytes = BASE64.decode(encoded.trim().as_bytes()).map_err(|e| eyre!("invalid base64: {e}"))?;

	let format = image::guess_format(&bytes).map(|f| format!("{f:?}")).unwrap_or_else(|_| "unknown".into());
	let img = image::load_from_memory(&bytes).map_err(|e| eyre!("failed to decode image: {e}"))?;
	Ok(json!({ "format": format, "width": img.width(), "height": img.height() }))
}

fn analyze_dataframe(args: Value) -> Result<Value> {
	let args: AnalyzeArgs = parse_args(args)?;
	let rows = args.data;

	match args.operation.as_str() {
		"sum" => {
			let Some(column) = args.column else { bail!("Column name required for sum") };
			Ok(json!({ "result": numeric_column(&rows, &column).iter().sum::<f64>() }))
		}
		"mean" => {
			let Some(column) = args.column else { bail!("Column name required for mean") };
			let values = numeric_column(&rows, &column);
			if values.is_empty() {
				bail!("No numeric values in column {column}");
			}
			Ok(json!({ "result": values.iter().sum::<f64>() / values.len() as f64 }))
		}
		"count" => Ok(json!({ "result": rows.len() })),
		"filter" => {
			let filtered: Vec<&Map<String, Value>> = rows.iter().filter(|row| args.extra.iter().all(|(key, want)| row.get(key) == Some(want))).collect();
			Ok(json!({ "result": filtered, "count": filtered.len() }))
		}
		"groupby" => {
			let Some(by) = args.by else { bail!("Group by column required") };
			let agg = args.agg.as_deref().unwrap_or("count");
			let mut groups: Map<String, Value> = Map::new();
			match agg {
				"count" => {
					for row in &rows {
						let key = row.get(&by).map(value_key).unwrap_or_default();
						let entry = groups.entry(key).or_insert(json!(0));
						*entry = json!(entry.as_u64().unwrap_or(0) + 1);
					}
				}
				"sum" | "mean" => {
					let Some(column) = args.column else { bail!("Column name required for {agg} aggregation") };
					let mut sums: Map<String, Value> = Map::new();
					let mut counts: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
					for row in &rows {
						let key = row.get(&by).map(value_key).unwrap_or_default();
						if let Some(v) = row.get(&column).and_then(numeric) {
							let entry = sums.entry(key.clone()).or_insert(json!(0.0));
							*entry = json!(entry.as_f64().unwrap_or(0.0) + v);
							*counts.entry(key).or_insert(0) += 1;
						}
					}
					if agg == "mean" {
						for (key, value) in sums.iter_mut() {
							let n = counts.get(key).copied().unwrap_or(1).max(1);
							*value = json!(value.as_f64().unwrap_or(0.0) / n as f64);
						}
					}
					groups = sums;
				}
				other => bail!("Unknown aggregation: {other}"),
			}
			Ok(json!({ "result": groups }))
		}
		"sort" => {
			let Some(by) = args.by.or(args.column) else { bail!("Sort column required") };
			let ascending = args.ascending.unwrap_or(true);
			let mut sorted = rows;
			sorted.sort_by(|a, b| value_order(a.get(&by), b.get(&by)));
			if !ascending {
				sorted.reverse();
			}
			Ok(json!({ "result": sorted }))
		}
		other => bail!("Unknown operation: {other}"),
	}
}

fn calculate_statistics(args: Value) -> Result<Value> {
	let StatisticsArgs { data, column } = parse_args(args)?;
	if !data.iter().any(|row| row.contains_key(&column)) {
		bail!("Column {column} not found");
	}
	let values = numeric_column(&data, &column);
	if values.is_empty() {
		bail!("No numeric values in column {column}");
	}

	let n = values.len();
	let sum: f64 = values.iter().sum();
	let mean = sum / n as f64;
	let std = if n > 1 {
		(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
	} else {
		0.0
	};
	let min = values.iter().copied().fold(f64::INFINITY, f64::min);
	let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

	let mut sorted = values;
	sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
	let median = if n % 2 == 1 { sorted[n / 2] } else { (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0 };

	Ok(json!({ "count": n, "mean": mean, "std": std, "min": min, "max": max, "median": median, "sum": sum }))
}

async fn create_chart(ctx: &ToolContext, args: Value) -> Result<Value> {
	let ChartArgs { data, chart_type, x, y, title } = parse_args(args)?;
	match chart_type.as_str() {
		"bar" | "line" | "scatter" | "pie" => {}
		other => bail!("Unknown chart type: {other}"),
	}

	let labels: Vec<Value> = data.iter().map(|row| row.get(&x).cloned().unwrap_or(Value::Null)).collect();
	let values: Vec<Value> = data.iter().map(|row| row.get(&y).cloned().unwrap_or(Value::Null)).collect();

	let chart = json!({
		"type": chart_type,
		"data": {
			"labels": labels,
			"datasets": [{ "label": title.clone().unwrap_or_else(|| y.clone()), "data": values }]
		},
		"options": { "title": { "display": title.is_some(), "text": title } }
	});

	let response = ctx
		.http
		.post(&ctx.chart_backend_url)
		.json(&json!({ "chart": chart, "format": "png" }))
		.send()
		.await
		.map_err(|e| eyre!("chart backend request failed: {e}"))?
		.error_for_status()
		.map_err(|e| eyre!("chart backend request failed: {e}"))?;
	let png = response.bytes().await.map_err(|e| eyre!("chart backend body failed: {e}"))?;

	Ok(json!({ "image": format!("data:image/png;base64,{}", BASE64.encode(&png)), "chart_type": chart_type }))
}

/// Numeric view of a JSON value; numeric-looking strings count.
fn numeric(value: &Value) -> Option<f64> {
	value.as_f64().or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn numeric_column(rows: &[Map<String, Value>], column: &str) -> Vec<f64> {
	rows.iter().filter_map(|row| row.get(column).and_then(numeric)).collect()
}

/// Stable string key for grouping and lexicographic comparison
fn value_key(value: &Value) -> String {
	match value {
		Value::String(s) => s.clone(),
		other => other.to_string(),
	}
}

fn value_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a.and_then(numeric), b.and_then(numeric)) {
		(Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
		_ => {
			let ka = a.map(value_key).unwrap_or_default();
			let kb = b.map(value_key).unwrap_or_default();
			ka.cmp(&kb)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_rows() -> Value {
		json!([
			{ "city": "Lyon", "sales": 10 },
			{ "city": "Lyon", "sales": 30 },
			{ "city": "Nice", "sales": 5 }
		])
	}

	fn test_ctx() -> ToolContext {
		ToolContext {
			http: reqwest::Client::builder().build().expect("client"),
			chart_backend_url: "http://127.0.0.1:1/chart".into(),
		}
	}

	#[test]
	fn analyze_sum_and_mean() {
		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "sum", "column": "sales" })).expect("sum");
		assert_eq!(out["result"], json!(45.0));

		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "mean", "column": "sales" })).expect("mean");
		assert_eq!(out["result"], json!(15.0));
	}

	#[test]
	fn analyze_count() {
		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "count" })).expect("count");
		assert_eq!(out["result"], json!(3));
	}

	#[test]
	fn analyze_filter_on_extra_keys() {
		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "filter", "city": "Lyon" })).expect("filter");
		assert_eq!(out["count"], json!(2));
	}

	#[test]
	fn analyze_groupby_count_and_sum() {
		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "groupby", "by": "city" })).expect("groupby");
		assert_eq!(out["result"]["Lyon"], json!(2));
		assert_eq!(out["result"]["Nice"], json!(1));

		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "groupby", "by": "city", "agg": "sum", "column": "sales" })).expect("groupby sum");
		assert_eq!(out["result"]["Lyon"], json!(40.0));
	}

	#[test]
	fn analyze_sort_descending() {
		let out = analyze_dataframe(json!({ "data": sample_rows(), "operation": "sort", "by": "sales", "ascending": false })).expect("sort");
		assert_eq!(out["result"][0]["sales"], json!(30));
		assert_eq!(out["result"][2]["sales"], json!(5));
	}

	#[test]
	fn analyze_unknown_operation_errors() {
		let err = analyze_dataframe(json!({ "data": [], "operation": "pivot" })).expect_err("unknown op");
		assert!(err.to_string().contains("Unknown operation"));
	}

	#[test]
	fn statistics_over_numeric_column() {
		let data = json!([{ "v": 1 }, { "v": 2 }, { "v": 3 }, { "v": 4 }]);
		let out = calculate_statistics(json!({ "data": data, "column": "v" })).expect("stats");
		assert_eq!(out["count"], json!(4));
		assert_eq!(out["mean"], json!(2.5));
		assert_eq!(out["median"], json!(2.5));
		assert_eq!(out["sum"], json!(10.0));
		assert_eq!(out["min"], json!(1.0));
		assert_eq!(out["max"], json!(4.0));
		let std = out["std"].as_f64().expect("std");
		assert!((std - 1.2909944487358056).abs() < 1e-9);
	}

	#[test]
	fn statistics_missing_column_errors() {
		let err = calculate_statistics(json!({ "data": [{ "v": 1 }], "column": "w" })).expect_err("missing column");
		assert!(err.to_string().contains("not found"));
	}

	#[test]
	fn csv_decodes_with_numeric_coercion() {
		let csv = "name,count\nalpha,3\nbeta,4\n";
		let encoded = BASE64.encode(csv);
		let out = process_csv(json!({ "base64_content": encoded })).expect("csv");
		assert_eq!(out["columns"], json!(["name", "count"]));
		assert_eq!(out["rows"], json!(2));
		assert_eq!(out["head"][0]["count"], json!(3));
		assert_eq!(out["head"][1]["name"], json!("beta"));
	}

	#[tokio::test]
	async fn dispatch_unknown_tool_is_an_error_payload() {
		let out = dispatch(&test_ctx(), "summon_demon", json!({})).await;
		assert_eq!(out["error"], json!("Unknown function: summon_demon"));
	}

	#[tokio::test]
	async fn dispatch_handler_failure_is_an_error_payload() {
		let out = dispatch(&test_ctx(), "process_pdf", json!({ "base64_content": "%%%" })).await;
		assert!(out["error"].as_str().expect("error message").contains("invalid base64"));
	}

	#[tokio::test]
	async fn dispatch_bad_arguments_is_an_error_payload() {
		let out = dispatch(&test_ctx(), "calculate_statistics", json!({ "data": "not-a-list", "column": "v" })).await;
		assert!(out["error"].as_str().expect("error message").contains("invalid arguments"));
	}
}
