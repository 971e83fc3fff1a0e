pub mod config;
pub mod error;
pub mod mapper;
pub mod report;
pub mod source;

pub use config::{RunConfig, RunConfigBuilder};
pub use error::MapError;
pub use mapper::{FailureReason, Mapper, MapperState, RunReport, RunStatus};
pub use report::{ReportFormat, generate_text_report, render};
pub use source::{StaticSource, WordlistSource, normalize_candidate};

pub fn print_banner() {
    let banner = r#"
     _                                          
 ___| |_ __ _ _ __ __ _  __ _ _______ _ __ 
/ __| __/ _` | '__/ _` |/ _` |_  / _ \ '__|
\__ \ || (_| | | | (_| | (_| |/ /  __/ |   
|___/\__\__,_|_|  \__, |\__,_/___\___|_|   
                  |___/                    
"#;
    eprintln!("{}", banner);
    eprintln!("  API endpoint mapper v{}\n", env!("CARGO_PKG_VERSION"));
}
