//! Parsers for `iw` command output

use crate::error::{Error, Result};
use nom::{
    Parser,
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{digit1, space0, space1},
    combinator::{map, map_res, rest},
    sequence::preceded,
};

/// Fields of interest from `iw dev <if> info`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevInfo {
    pub wiphy: u32,
    pub addr: String,
}

/// Association state from `iw dev <if> link`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkStatus {
    Connected(String),
    JoinedIbss(String),
    NotConnected,
}

impl LinkStatus {
    pub fn is_established(&self) -> bool {
        !matches!(self, LinkStatus::NotConnected)
    }
}

/// Parse `iw dev <if> info` output
///
/// ```text
/// Interface wlan0
///         ifindex 4
///         addr 02:00:00:00:00:00
///         type managed
///         wiphy 0
/// ```
pub fn parse_dev_info(output: &str) -> Result<DevInfo> {
    let mut wiphy = None;
    let mut addr = None;

    for line in output.lines() {
        let Ok((_, (key, value))) = parse_field(line) else {
            continue;
        };
        match key {
            "wiphy" => {
                let (_, index) = parse_index(value).map_err(|_| {
                    Error::OutputParse(format!("invalid wiphy index '{}'", value))
                })?;
                wiphy = Some(index);
            }
            "addr" => {
                let (_, mac) = parse_mac(value)
                    .map_err(|_| Error::OutputParse(format!("invalid MAC address '{}'", value)))?;
                addr = Some(mac.to_string());
            }
            _ => {}
        }
    }

    match (wiphy, addr) {
        (Some(wiphy), Some(addr)) => Ok(DevInfo { wiphy, addr }),
        (None, _) => Err(Error::OutputParse("no 'wiphy' field in iw output".into())),
        (_, None) => Err(Error::OutputParse("no 'addr' field in iw output".into())),
    }
}

/// Parse `iw dev <if> link` output
pub fn parse_link(output: &str) -> LinkStatus {
    let first = output.lines().next().unwrap_or("").trim();
    match parse_link_line(first) {
        Ok((_, status)) => status,
        Err(_) => LinkStatus::NotConnected,
    }
}

fn parse_field(input: &str) -> nom::IResult<&str, (&str, &str)> {
    let (input, _) = space0.parse(input)?;
    let (input, key) =
        take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)?;
    let (input, _) = space1.parse(input)?;
    let (input, value) = rest.parse(input)?;

    Ok((input, (key, value.trim())))
}

fn parse_index(input: &str) -> nom::IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)
}

fn parse_mac(input: &str) -> nom::IResult<&str, &str> {
    let (rest, mac) = take_while1(|c: char| c.is_ascii_hexdigit() || c == ':').parse(input)?;
    if mac.len() != 17 || mac.split(':').count() != 6 {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }
    Ok((rest, mac))
}

fn parse_link_line(input: &str) -> nom::IResult<&str, LinkStatus> {
    alt((
        map(preceded(tag("Connected to "), parse_mac), |mac| {
            LinkStatus::Connected(mac.to_string())
        }),
        map(preceded(tag("Joined IBSS "), parse_mac), |mac| {
            LinkStatus::JoinedIbss(mac.to_string())
        }),
        map(tag("Not connected"), |_| LinkStatus::NotConnected),
    ))
    .parse(input)
}
