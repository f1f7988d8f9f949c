use crate::data::Data;
use crate::error::Result;
use crate::readers::Reader;
use crate::source::Source;

/// Standard-input reader. The stream is consumed once and memoized on
/// [`Data`], so multiple `stdin:` datasources see the same bytes.
pub struct StdinReader;

impl Reader for StdinReader {
    fn read(&self, data: &Data, _source: &Source, _args: &[String]) -> Result<Vec<u8>> {
        data.read_stdin()
    }
}
