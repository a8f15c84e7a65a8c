//! CSV 导出
//!
//! 列表导出与定时报表共用的 CSV 渲染，以及下载响应构造。

use axum::{
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

/// 按 RFC 4180 转义单个字段
pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// 分转为两位小数的金额文本
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// 逐行构建 CSV 文本
#[derive(Debug)]
pub struct CsvWriter {
    buf: String,
    rows: usize,
}

impl CsvWriter {
    /// 以表头创建
    pub fn new(headers: &[&str]) -> Self {
        let mut writer = Self {
            buf: String::new(),
            rows: 0,
        };
        writer.push_line(headers.iter().copied());
        writer
    }

    /// 追加一行数据
    pub fn write_row<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.push_line(fields);
        self.rows += 1;
    }

    fn push_line<I, S>(&mut self, fields: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let line = fields
            .into_iter()
            .map(|f| csv_quote(f.as_ref()))
            .collect::<Vec<_>>()
            .join(",");
        self.buf.push_str(&line);
        self.buf.push('\n');
    }

    /// 数据行数（不含表头）
    pub fn row_count(&self) -> usize {
        self.rows
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// 构造 CSV 文件下载响应
pub fn csv_download(filename: &str, body: String) -> Response {
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{}\"", filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    (
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/csv; charset=utf-8"),
            ),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response()
}

/// 可选字段渲染为空串
pub fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quote() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_quote("line\nbreak"), "\"line\nbreak\"");
    }

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-250), "-2.50");
    }

    #[test]
    fn test_writer_rows() {
        let mut writer = CsvWriter::new(&["id", "name"]);
        writer.write_row(["1".to_string(), "Rust, Advanced".to_string()]);
        writer.write_row(["2", "Go"]);
        assert_eq!(writer.row_count(), 2);
        assert_eq!(writer.finish(), "id,name\n1,\"Rust, Advanced\"\n2,Go\n");
    }

    #[test]
    fn test_csv_download_headers() {
        let response = csv_download("enrollments.csv", "id\n".to_string());
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/csv; charset=utf-8");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"enrollments.csv\""
        );
    }
}
