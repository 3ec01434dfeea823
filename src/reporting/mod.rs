// Export generation: CSV, PDF and zipped HTML reports

pub mod csv;
pub mod html;
pub mod pdf;
