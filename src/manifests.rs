//! Manifests
//!
//! The external interface of the engine: comma-separated ULD and parcel manifests in, the
//! placement ledger out. Everything else in the crate works on the in-memory data model; this
//! module is the only place that knows the wire format.
//!

use std::fs::File;
use std::io::{self, BufRead, Write};

use super::util::*;

fn parse_field<T: std::str::FromStr>(field: &str, what: &str, line_number: usize) -> Result<T, String> {
    field
        .trim()
        .parse::<T>()
        .map_err(|_| format!("line {}: cannot parse {} from {:?}", line_number, what, field))
}

/// parse a ULD manifest: one `id,length,width,height,weight_limit` entry per line; a single
/// header line is tolerated
pub fn parse_uld_manifest(reader: impl BufRead) -> Result<Vec<UldSpec>, String> {
    let mut ulds = vec![];
    let mut first_content_line = true;
    for (line_index, line) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.map_err(|err| format!("line {}: {}", line_number, err))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 5 {
            return Err(format!("line {}: expected 5 fields, found {}", line_number, fields.len()));
        }
        if first_content_line && fields[1].trim().parse::<Length>().is_err() {
            first_content_line = false;
            continue; // header
        }
        first_content_line = false;
        ulds.push(UldSpec::new(
            fields[0].trim(),
            [
                parse_field(fields[1], "length", line_number)?,
                parse_field(fields[2], "width", line_number)?,
                parse_field(fields[3], "height", line_number)?,
            ],
            parse_field(fields[4], "weight limit", line_number)?,
        ));
    }
    Ok(ulds)
}

/// parse a parcel manifest: one `id,length,width,height,weight,type,delay_cost` entry per
/// line, type being `Priority` or `Economy` and the delay cost of a priority parcel written
/// as the `-` sentinel
pub fn parse_parcel_manifest(reader: impl BufRead) -> Result<Vec<ParcelSpec>, String> {
    let mut parcels = vec![];
    let mut first_content_line = true;
    for (line_index, line) in reader.lines().enumerate() {
        let line_number = line_index + 1;
        let line = line.map_err(|err| format!("line {}: {}", line_number, err))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != 7 {
            return Err(format!("line {}: expected 7 fields, found {}", line_number, fields.len()));
        }
        if first_content_line && fields[1].trim().parse::<Length>().is_err() {
            first_content_line = false;
            continue; // header
        }
        first_content_line = false;
        let priority = match fields[5].trim() {
            "Priority" | "P" => true,
            "Economy" | "E" => false,
            other => return Err(format!("line {}: unknown parcel type {:?}", line_number, other)),
        };
        let delay_field = fields[6].trim();
        let delay_cost = if delay_field == "-" {
            if !priority {
                return Err(format!("line {}: economy parcel without a delay cost", line_number));
            }
            0
        } else {
            parse_field(delay_field, "delay cost", line_number)?
        };
        parcels.push(ParcelSpec::new(
            fields[0].trim(),
            [
                parse_field(fields[1], "length", line_number)?,
                parse_field(fields[2], "width", line_number)?,
                parse_field(fields[3], "height", line_number)?,
            ],
            parse_field(fields[4], "weight", line_number)?,
            priority,
            delay_cost,
        ));
    }
    Ok(parcels)
}

pub fn read_uld_manifest(path: &str) -> Result<Vec<UldSpec>, String> {
    let file = File::open(path).map_err(|err| format!("cannot open {}: {}", path, err))?;
    parse_uld_manifest(io::BufReader::new(file))
}

pub fn read_parcel_manifest(path: &str) -> Result<Vec<ParcelSpec>, String> {
    let file = File::open(path).map_err(|err| format!("cannot open {}: {}", path, err))?;
    parse_parcel_manifest(io::BufReader::new(file))
}

/// read both manifests and assemble a checked initializer
pub fn read_initializer(uld_path: &str, parcel_path: &str, spread_penalty: Cost) -> Result<PackInitializer, String> {
    let initializer = PackInitializer::new(
        read_uld_manifest(uld_path)?,
        read_parcel_manifest(parcel_path)?,
        spread_penalty,
    );
    initializer.sanity_check()?;
    Ok(initializer)
}

/// write the output ledger: a header line `total_cost,num_packed,num_priority_ulds`, then one
/// line per parcel in catalogue order, unpacked parcels flagged with `NONE` and `-1` corners
#[allow(clippy::unnecessary_cast)]
pub fn write_pack_plan(writer: &mut impl Write, initializer: &PackInitializer, plan: &PackPlan) -> io::Result<()> {
    writeln!(
        writer,
        "{},{},{}",
        plan.total_cost,
        plan.num_packed(),
        plan.priority_uld_num
    )?;
    for (parcel_index, placement) in plan.placements.iter().enumerate() {
        let parcel = &initializer.parcels[parcel_index];
        match placement {
            Some(placement) => {
                let end = placement.region().end_corner();
                writeln!(
                    writer,
                    "{},{},{},{},{},{},{},{}",
                    parcel.id,
                    initializer.ulds[placement.uld_index as usize].id,
                    placement.anchor[0],
                    placement.anchor[1],
                    placement.anchor[2],
                    end[0],
                    end[1],
                    end[2],
                )?;
            }
            None => writeln!(writer, "{},NONE,-1,-1,-1,-1,-1,-1", parcel.id)?,
        }
    }
    Ok(())
}

pub fn pack_plan_to_string(initializer: &PackInitializer, plan: &PackPlan) -> String {
    let mut buffer = Vec::new();
    write_pack_plan(&mut buffer, initializer, plan).unwrap();
    String::from_utf8(buffer).unwrap()
}
