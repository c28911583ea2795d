use crate::bytecode::assemble::Bytecode;
use crate::bytecode::op::Op;

/// Render a byte stream as one instruction per line: `offset  MNEMONIC args`.
/// The entry offset is marked with `>`. An unrecognized opcode byte ends the
/// listing, since operand sizes past it are unknowable.
pub fn disassemble(bc: &Bytecode) -> String {
    let mut out = String::new();
    let mut pos = 0usize;

    while pos < bc.bytes.len() {
        let at = pos;
        let byte = bc.bytes[pos];
        pos += 1;

        let marker = if at == bc.entry { '>' } else { ' ' };

        let op = match Op::from_opcode(byte) {
            Some(op) => op,
            None => {
                out.push_str(&format!("{} {:04}  ?? 0x{:02x}\n", marker, at, byte));
                break;
            }
        };

        out.push_str(&format!("{} {:04}  {}", marker, at, op.mnemonic()));

        match op {
            Op::PushStr => {
                let len = read_u16(&bc.bytes, &mut pos).unwrap_or(0) as usize;
                let end = (pos + len).min(bc.bytes.len());
                let text = String::from_utf8_lossy(&bc.bytes[pos..end]);
                out.push_str(&format!(" \"{}\"", text));
                pos = end;
            }
            _ => {
                for _ in 0..op.operand_count() {
                    match read_u16(&bc.bytes, &mut pos) {
                        Some(word) => out.push_str(&format!(" {}", word)),
                        None => out.push_str(" <truncated>"),
                    }
                }
            }
        }

        out.push('\n');
    }

    out
}

fn read_u16(bytes: &[u8], pos: &mut usize) -> Option<u16> {
    let word = bytes.get(*pos..*pos + 2)?;
    *pos += 2;
    Some(u16::from_le_bytes([word[0], word[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bc(bytes: Vec<u8>, entry: usize) -> Bytecode {
        Bytecode { bytes, entry }
    }

    #[test]
    fn test_disassemble_simple_program() {
        let listing = disassemble(&bc(vec![0x01, 5, 0, 0x03, 0xff], 0));
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("PUSH_NUM 5"));
        assert!(lines[1].contains("PUTS"));
        assert!(lines[2].contains("HALT"));
    }

    #[test]
    fn test_disassemble_marks_entry() {
        let listing = disassemble(&bc(vec![0x14, 0x16, 0x03], 1));
        let lines: Vec<&str> = listing.lines().collect();
        assert!(lines[0].starts_with("  0000"));
        assert!(lines[1].starts_with("> 0001"));
    }

    #[test]
    fn test_disassemble_string() {
        let mut bytes = vec![0x15, 2, 0];
        bytes.extend_from_slice(b"ok");
        let listing = disassemble(&bc(bytes, 0));
        assert!(listing.contains("PUSH_STR \"ok\""));
    }

    #[test]
    fn test_disassemble_stops_at_unknown_opcode() {
        let listing = disassemble(&bc(vec![0x16, 0x00, 0x16], 0));
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("??"));
    }
}
