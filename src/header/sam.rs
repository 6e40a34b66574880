//! SAM text header parsing and serialization.
//!
//! Only `@SQ` and `@RG` records are interpreted; `@HD` and every other line is
//! carried through unchanged so that reheadered copies keep their provenance.

use super::model::{Contig, InputHeader, ReadGroup};
use crate::error::{Result, VarcallError};

/// Parse SAM header text into an [`InputHeader`].
///
/// `origin` names the file the text came from and is only used in errors.
pub fn parse_header_text(text: &str, origin: &str) -> Result<InputHeader> {
    let mut header = InputHeader::default();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if !line.starts_with('@') {
            return Err(VarcallError::format(
                origin,
                format!("line {}: header lines must start with '@'", line_no + 1),
            ));
        }

        let mut fields = line.split('\t');
        let record_type = fields.next().unwrap_or_default();

        match record_type {
            "@SQ" => header.contigs.push(parse_sq(fields, origin, line_no + 1)?),
            "@RG" => header.read_groups.push(parse_rg(fields, origin, line_no + 1)?),
            "@HD" => header.hd_line = Some(line.to_string()),
            _ => header.other_lines.push(line.to_string()),
        }
    }

    Ok(header)
}

fn split_tag<'a>(field: &'a str, origin: &str, line_no: usize) -> Result<(&'a str, &'a str)> {
    match field.split_once(':') {
        Some((tag, value)) if tag.len() == 2 => Ok((tag, value)),
        _ => Err(VarcallError::format(
            origin,
            format!("line {}: malformed tag '{}'", line_no, field),
        )),
    }
}

fn parse_sq<'a>(
    fields: impl Iterator<Item = &'a str>,
    origin: &str,
    line_no: usize,
) -> Result<Contig> {
    let mut name = None;
    let mut length = None;
    let mut checksum = None;
    let mut other_tags = Vec::new();

    for field in fields {
        let (tag, value) = split_tag(field, origin, line_no)?;
        match tag {
            "SN" => name = Some(value.to_string()),
            "LN" => {
                let parsed = value.parse::<u64>().map_err(|_| {
                    VarcallError::format(
                        origin,
                        format!("line {}: invalid sequence length '{}'", line_no, value),
                    )
                })?;
                length = Some(parsed);
            }
            "M5" => checksum = Some(value.to_ascii_lowercase()),
            _ => other_tags.push((tag.to_string(), value.to_string())),
        }
    }

    let name = name.ok_or_else(|| {
        VarcallError::format(origin, format!("line {}: @SQ record without SN", line_no))
    })?;
    let length = length.ok_or_else(|| {
        VarcallError::format(origin, format!("line {}: @SQ record without LN", line_no))
    })?;

    Ok(Contig {
        name,
        length,
        checksum,
        other_tags,
    })
}

fn parse_rg<'a>(
    fields: impl Iterator<Item = &'a str>,
    origin: &str,
    line_no: usize,
) -> Result<ReadGroup> {
    let mut id = None;
    let mut sample_name = String::new();
    let mut description = None;
    let mut other_tags = Vec::new();

    for field in fields {
        let (tag, value) = split_tag(field, origin, line_no)?;
        match tag {
            "ID" => id = Some(value.to_string()),
            "SM" => sample_name = value.to_string(),
            "DS" => description = Some(value.to_string()),
            _ => other_tags.push((tag.to_string(), value.to_string())),
        }
    }

    let id = id.ok_or_else(|| {
        VarcallError::format(origin, format!("line {}: @RG record without ID", line_no))
    })?;

    Ok(ReadGroup {
        id,
        sample_name,
        description,
        other_tags,
    })
}

/// Serialize a header back to SAM text.
///
/// Record order is `@HD`, `@SQ`, `@RG`, then every other line as parsed.
pub fn to_header_text(header: &InputHeader) -> String {
    let mut out = String::new();

    if let Some(hd) = &header.hd_line {
        out.push_str(hd);
        out.push('\n');
    }

    for contig in &header.contigs {
        out.push_str(&format!("@SQ\tSN:{}\tLN:{}", contig.name, contig.length));
        if let Some(m5) = &contig.checksum {
            out.push_str(&format!("\tM5:{}", m5));
        }
        push_tags(&mut out, &contig.other_tags);
        out.push('\n');
    }

    for rg in &header.read_groups {
        out.push_str(&format!("@RG\tID:{}", rg.id));
        if !rg.sample_name.is_empty() {
            out.push_str(&format!("\tSM:{}", rg.sample_name));
        }
        if let Some(ds) = &rg.description {
            out.push_str(&format!("\tDS:{}", ds));
        }
        push_tags(&mut out, &rg.other_tags);
        out.push('\n');
    }

    for line in &header.other_lines {
        out.push_str(line);
        out.push('\n');
    }

    out
}

fn push_tags(out: &mut String, tags: &[(String, String)]) {
    for (tag, value) in tags {
        out.push('\t');
        out.push_str(tag);
        out.push(':');
        out.push_str(value);
    }
}
