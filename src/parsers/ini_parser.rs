use crate::prelude::*;
use pest::Parser;
use pest_derive::Parser;
use std::{collections::HashMap, path::Path};

#[derive(Parser)]
#[grammar = "parsers/pegs/ini.pest"]
pub struct IniParser;

pub type Sections = HashMap<String, HashMap<String, String>>;

/// Parses the ini dialect of `~/.aws/credentials` and `~/.aws/config`.
/// Keys are lowercased; properties before the first section land in `""`.
pub fn parse_ini(content: &str) -> Result<Sections> {
    let file = IniParser::parse(Rule::file, content)
        .map_err(|err| eyre!("{err}"))?
        .next()
        .ok_or_else(|| eyre!("empty ini document"))?;
    let mut sections: Sections = HashMap::new();
    let mut current_section = String::new();
    sections.entry(current_section.clone()).or_default();
    for line in file.into_inner() {
        match line.as_rule() {
            Rule::section => {
                let name = line.into_inner().next().map(|x| x.as_str()).unwrap_or_default();
                current_section = name.trim().to_string();
                sections.entry(current_section.clone()).or_default();
            }
            Rule::property => {
                let rules = &mut line.into_inner();
                let name = rules.next().map(|x| x.as_str()).unwrap_or_default();
                let value = rules.next().map(|x| x.as_str()).unwrap_or_default();
                sections
                    .entry(current_section.clone())
                    .or_default()
                    .insert(name.to_lowercase(), value.trim().to_string());
            }
            _ => (),
        }
    }
    Ok(sections)
}

pub fn parse_ini_from_file(path: impl AsRef<Path>) -> Result<Sections> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).wrap_err(f!("can't read {path:?}"))?;
    parse_ini(&content).wrap_err(f!("can't parse {path:?}"))
}

#[cfg(test)]
mod tests {
    const CONFIG: &str = r#"
    [default]
    region = eu-west-1

    # assumed from default
    [profile test]
    role_arn =arn:aws:iam::123123123:role/PurchaseReservations
    source_profile = default
    region = eu-west-1

    [profile prod]
    role_arn = arn:aws:iam::123123123:role/PurchaseReservations
    source_profile = default
    region = us-east-1

"#;

    #[test]
    fn parse_ini_succeeds() {
        let res = super::parse_ini(CONFIG);
        match res {
            Ok(r) => {
                assert_eq!(r.len(), 4);
                assert_eq!(r["profile prod"]["region"], "us-east-1");
                assert_eq!(
                    r["profile test"]["role_arn"],
                    "arn:aws:iam::123123123:role/PurchaseReservations"
                );
            }
            Err(err) => panic!("{err:#}"),
        }
    }

    #[test]
    fn keys_are_lowercased_and_values_trimmed() {
        let r = super::parse_ini("[default]\nAWS_Access_Key_ID = AKIDEXAMPLE   \n").unwrap();
        assert_eq!(r["default"]["aws_access_key_id"], "AKIDEXAMPLE");
    }
}
