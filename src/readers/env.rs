use crate::data::Data;
use crate::error::Result;
use crate::readers::Reader;
use crate::source::Source;

/// Environment variable reader. `env:FOO`, `env:/FOO` and `env://FOO` all
/// name the variable `FOO`; an unset variable reads as empty.
pub struct EnvReader;

impl Reader for EnvReader {
    fn read(&self, _data: &Data, source: &Source, _args: &[String]) -> Result<Vec<u8>> {
        let url = source.url();
        let name = match url.path().trim_start_matches('/') {
            "" => url.host_str().unwrap_or_default(),
            path => path,
        };
        Ok(std::env::var(name).unwrap_or_default().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::urls::parse_source_url;

    #[test]
    fn reads_from_path_or_host() {
        std::env::set_var("DATATAP_ENV_TEST", "hello");
        let data = Data::new();
        for spec in ["env:DATATAP_ENV_TEST", "env:/DATATAP_ENV_TEST", "env://DATATAP_ENV_TEST"] {
            let source = Source::new("t", parse_source_url(spec).unwrap(), vec![]);
            let bytes = EnvReader.read(&data, &source, &[]).unwrap();
            assert_eq!(bytes, b"hello", "for {spec}");
        }
    }

    #[test]
    fn unset_variable_is_empty_not_an_error() {
        let data = Data::new();
        let source = Source::new("t", parse_source_url("env:DATATAP_DEFINITELY_UNSET").unwrap(), vec![]);
        assert_eq!(EnvReader.read(&data, &source, &[]).unwrap(), b"");
    }
}
