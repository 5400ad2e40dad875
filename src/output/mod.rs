pub mod console;
pub mod csv_file;

use crate::benchmark::{BenchmarkResult, Summary};
use crate::error::Result;

pub use self::console::render_report;
pub use self::csv_file::CsvSink;

/// 运行结束时接收最终结果集与汇总，只调用一次
pub trait ResultSink: Send + Sync {
    fn write(&self, results: &[BenchmarkResult], summary: &Summary) -> Result<()>;
}
