use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

pub fn dump_default_to_json_file<T>(filename: impl AsRef<Path>) -> Result<()>
    where T: Default + Serialize
{
    let file = fs::File::create(filename)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, &T::default())?;
    Ok(())
}

pub fn read_json_file<T>(filename: impl AsRef<Path>) -> Result<T>
    where T: DeserializeOwned
{
    let file = fs::File::open(filename)?;
    let reader = BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Parse a list of integers separated by commas and/or whitespace, e.g. "2, 8, 257 0"
pub fn parse_index_list<T>(s: &str) -> std::result::Result<Vec<T>, T::Err>
    where T: FromStr
{
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(str::parse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::DofLayout;

    #[test]
    fn parse_index_list_test() {
        let v: Vec<u64> = parse_index_list("2, 8,257  0").unwrap();
        assert_eq!(v, vec![2, 8, 257, 0]);

        let v: Vec<usize> = parse_index_list("").unwrap();
        assert!(v.is_empty());

        assert!(parse_index_list::<u64>("1, x").is_err());
        assert!(parse_index_list::<u64>("-1").is_err());
    }

    #[test]
    fn json_file_round_trip() {
        let path = std::env::temp_dir().join(format!("dof_rs_layout_{}.json", std::process::id()));
        dump_default_to_json_file::<DofLayout>(&path).unwrap();

        let layout: DofLayout = read_json_file(&path).unwrap();
        assert_eq!(layout, DofLayout::default());

        fs::remove_file(&path).unwrap();
    }
}
