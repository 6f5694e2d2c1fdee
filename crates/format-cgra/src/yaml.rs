//! Structured YAML program form.
//!
//! The document is a top-level map from coordinate strings `(x,y)` to
//! programs. Raw serde structs mirror the wire schema exactly; conversion
//! into the core model parses every opcode and operand once.

use std::collections::BTreeMap;
use std::path::Path;

use cgra_core::{
    Color, EntryBlock, InstructionGroup, Opcode, Operand, Operation, Program, ProgramSet,
    parse_coord,
};
use serde::Deserialize;

use crate::{LoadError, canonicalize_store};

#[derive(Debug, Deserialize)]
struct RawProgram {
    #[serde(default)]
    compiled_ii: u32,
    #[serde(default)]
    entry_blocks: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawBlock {
    #[serde(default)]
    instruction_groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    operations: Vec<RawOperation>,
}

#[derive(Debug, Deserialize)]
struct RawOperation {
    opcode: String,
    #[serde(default)]
    src: Vec<RawOperand>,
    #[serde(default)]
    dst: Vec<RawOperand>,
}

#[derive(Debug, Deserialize)]
struct RawOperand {
    #[serde(rename = "impl")]
    impl_: String,
    #[serde(default)]
    color: String,
    /// Reserved by the schema; carried but unused by the simulator.
    #[serde(default)]
    #[allow(dead_code)]
    flag: bool,
}

/// Load the YAML program form from a string.
pub fn load_yaml_str(text: &str) -> Result<ProgramSet, LoadError> {
    let raw: BTreeMap<String, RawProgram> = serde_yaml::from_str(text)?;
    let mut set = ProgramSet::new();
    for (coord, program) in raw {
        let (x, y) = parse_coord(&coord)?;
        set.insert(x, y, convert_program(program)?);
    }
    Ok(set)
}

/// Load the YAML program form from a file.
pub fn load_yaml_path(path: impl AsRef<Path>) -> Result<ProgramSet, LoadError> {
    load_yaml_str(&std::fs::read_to_string(path)?)
}

fn convert_program(raw: RawProgram) -> Result<Program, LoadError> {
    let blocks = raw
        .entry_blocks
        .into_iter()
        .map(convert_block)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Program::new(raw.compiled_ii, blocks))
}

fn convert_block(raw: RawBlock) -> Result<EntryBlock, LoadError> {
    let groups = raw
        .instruction_groups
        .into_iter()
        .map(convert_group)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(EntryBlock::new(groups))
}

fn convert_group(raw: RawGroup) -> Result<InstructionGroup, LoadError> {
    let ops = raw
        .operations
        .into_iter()
        .map(convert_operation)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(InstructionGroup::new(ops))
}

fn convert_operation(raw: RawOperation) -> Result<Operation, LoadError> {
    let opcode = Opcode::from_mnemonic(&raw.opcode)?;
    let src = raw
        .src
        .into_iter()
        .map(convert_operand)
        .collect::<Result<Vec<_>, _>>()?;
    let dst = raw
        .dst
        .into_iter()
        .map(convert_operand)
        .collect::<Result<Vec<_>, _>>()?;
    let mut op = Operation::new(opcode, src, dst);
    canonicalize_store(&mut op);
    Ok(op)
}

fn convert_operand(raw: RawOperand) -> Result<Operand, LoadError> {
    let color = if raw.color.trim().is_empty() {
        None
    } else {
        Some(Color::from_name(raw.color.trim())?)
    };
    Ok(Operand::parse(&raw.impl_, color)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgra_core::Side;

    const DOC: &str = r##"
"(0,0)":
  compiled_ii: 8
  entry_blocks:
    - instruction_groups:
        - operations:
            - opcode: ADD
              src:
                - { impl: "West", color: "R" }
                - { impl: "#2" }
              dst:
                - { impl: "East", color: "Y" }
        - operations: []
"(1,0)":
  entry_blocks:
    - instruction_groups:
        - operations:
            - opcode: STORE
              src:
                - { impl: "North", color: "R" }
                - { impl: "$4" }
"##;

    #[test]
    fn document_round_trip() {
        let set = load_yaml_str(DOC).expect("valid document");
        assert_eq!(set.len(), 2);

        let p = set.get(0, 0).expect("tile (0,0)");
        assert_eq!(p.compiled_ii, 8);
        let group = &p.blocks[0].groups[0];
        assert_eq!(group.ops[0].opcode, Opcode::Add);
        assert_eq!(
            group.ops[0].src[0],
            Operand::Port {
                side: Side::West,
                color: Color::R
            }
        );
        assert_eq!(group.ops[0].src[1], Operand::Immediate(2));
        assert_eq!(
            group.ops[0].dst[0],
            Operand::Port {
                side: Side::East,
                color: Color::Y
            }
        );
        assert!(p.blocks[0].groups[1].is_empty(), "empty group kept");
    }

    #[test]
    fn store_is_canonicalized() {
        let set = load_yaml_str(DOC).expect("valid document");
        let op = &set.get(1, 0).expect("tile (1,0)").blocks[0].groups[0].ops[0];
        assert_eq!(op.src[0], Operand::Register(4), "address first");
        assert!(op.src[1].is_port(), "value second");
    }

    #[test]
    fn missing_ii_defaults_to_zero() {
        let set = load_yaml_str(DOC).expect("valid document");
        assert_eq!(set.get(1, 0).expect("tile").compiled_ii, 0);
    }

    #[test]
    fn bad_coordinate_is_rejected() {
        let doc = r#"
"0,0":
  entry_blocks: []
"#;
        assert!(matches!(
            load_yaml_str(doc),
            Err(LoadError::Parse(
                cgra_core::ParseError::InvalidCoordinate(_)
            ))
        ));
    }

    #[test]
    fn unknown_opcode_is_rejected() {
        let doc = r#"
"(0,0)":
  entry_blocks:
    - instruction_groups:
        - operations:
            - opcode: FROB
"#;
        assert!(matches!(
            load_yaml_str(doc),
            Err(LoadError::Parse(cgra_core::ParseError::UnknownOpcode(_)))
        ));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("program.yaml");
        std::fs::write(&path, DOC).expect("write");
        let set = load_yaml_path(&path).expect("load");
        assert_eq!(set.len(), 2);
    }
}
