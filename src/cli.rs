//! CLI argument definitions and command dispatch.
//!
//! The binary is a thin shell around [`Data`]: define datasources from
//! flags, then read one and print it.

use clap::Parser;
use indexmap::IndexMap;

use crate::data::Data;
use crate::error::{DatatapError, Result};
use crate::urls;

/// datatap - read datasources by alias or URL.
#[derive(Debug, Parser)]
#[command(name = "datatap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Define a datasource (ALIAS=URL, or a bare file path whose alias is
    /// inferred from the file name)
    #[arg(short = 'd', long = "datasource", value_name = "ALIAS=URL")]
    pub datasources: Vec<String>,

    /// Attach an HTTP header to a datasource ('alias=Name: value'),
    /// repeatable
    #[arg(short = 'H', long = "header", value_name = "ALIAS=NAME: VALUE")]
    pub headers: Vec<String>,

    /// List the defined datasource aliases and exit
    #[arg(long)]
    pub list: bool,

    /// Print the raw datasource bytes instead of parsed JSON
    #[arg(long)]
    pub raw: bool,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Alias or URL of the datasource to read
    pub alias: Option<String>,

    /// Extra path or key arguments for the read
    pub args: Vec<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    let data = Data::new();

    let mut headers = parse_header_specs(&cli.headers)?;
    for spec in &cli.datasources {
        let (alias, url) = urls::parse_alias_spec(spec)?;
        let alias_headers = headers.shift_remove(&alias).unwrap_or_default();
        data.define_datasource(&alias, &url, alias_headers)?;
        tracing::debug!(alias, url = %url, "defined datasource");
    }
    if let Some((alias, _)) = headers.first() {
        return Err(DatatapError::UndefinedDatasource {
            alias: alias.clone(),
        });
    }

    if cli.list {
        for alias in data.list_datasources() {
            println!("{alias}");
        }
        return Ok(());
    }

    let Some(alias) = &cli.alias else {
        return Err(anyhow::anyhow!("no datasource to read: pass an alias or URL").into());
    };

    if cli.raw {
        print!("{}", data.include(alias, &cli.args)?);
    } else {
        let value = data.datasource(alias, &cli.args)?;
        println!(
            "{}",
            serde_json::to_string_pretty(&value).map_err(anyhow::Error::from)?
        );
    }

    data.cleanup();
    Ok(())
}

/// Parse repeated `-H 'alias=Name: value'` flags into per-alias header
/// lists, preserving flag order.
fn parse_header_specs(specs: &[String]) -> Result<IndexMap<String, Vec<(String, String)>>> {
    let mut out: IndexMap<String, Vec<(String, String)>> = IndexMap::new();
    for spec in specs {
        let malformed = || {
            DatatapError::InvalidUrl {
                value: spec.clone(),
                message: "header must look like 'alias=Name: value'".to_string(),
            }
        };
        let (alias, header) = spec.split_once('=').ok_or_else(malformed)?;
        let (name, value) = header.split_once(':').ok_or_else(malformed)?;
        if alias.is_empty() || name.trim().is_empty() {
            return Err(malformed());
        }
        out.entry(alias.to_string())
            .or_default()
            .push((name.trim().to_string(), value.trim().to_string()));
    }
    Ok(out)
}
