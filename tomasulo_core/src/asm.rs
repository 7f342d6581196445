//! Line assembler for the simulator's instruction set.
//!
//! ```text
//! # comment
//! loop:   L.D   F0, 0(R1)
//!         ADD.D F4, F0, F2
//!         SUBI  R1, R1, 8
//!         BNE   R1, R0, loop
//! ```
//!
//! Lines that do not parse are dropped with a warning; assembling never fails.

use std::collections::BTreeMap;

use nom::{
    branch::alt,
    bytes::complete::take_while1,
    character::complete::{char, i64, space0, space1},
    combinator::{all_consuming, map_opt, opt, value},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use crate::{
    instr::{Category, Instr, Opcode},
    register::RegId,
};

pub struct Assembly {
    pub program: Vec<Instr>,
    pub labels: BTreeMap<String, i64>,
    pub warnings: Vec<String>,
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.'
}

fn ident(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char)(input)
}

fn label(input: &str) -> IResult<&str, &str> {
    terminated(ident, pair(space0, char(':')))(input)
}

fn sep(input: &str) -> IResult<&str, ()> {
    alt((
        value((), delimited(space0, char(','), space0)),
        value((), space1),
    ))(input)
}

fn register(input: &str) -> IResult<&str, RegId> {
    map_opt(ident, |s| RegId::try_from(s).ok())(input)
}

/// `imm(Rn)`, the immediate may be left out.
fn mem_operand(input: &str) -> IResult<&str, (i64, RegId)> {
    let (input, imm) = opt(i64)(input)?;
    let (input, base) = delimited(
        pair(char('('), space0),
        register,
        pair(space0, char(')')),
    )(input)?;
    Ok((input, (imm.unwrap_or(0), base)))
}

fn branch_target(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| is_ident_char(c) || c == '-' || c == '+')(input)
}

struct Parsed<'a> {
    instr: Instr,
    target: Option<&'a str>,
}

impl<'a> Parsed<'a> {
    fn plain(instr: Instr) -> Self {
        Self {
            instr,
            target: None,
        }
    }
}

fn instruction(input: &str) -> IResult<&str, Parsed<'_>> {
    let (input, op) = map_opt(ident, |s| Opcode::try_from(s).ok())(input)?;
    let (input, _) = space1(input)?;
    let i = Instr::new(op);
    match op.category() {
        Category::FpAddSub | Category::FpMulDiv => {
            let (input, (d, _, a, _, b)) =
                tuple((register, sep, register, sep, register))(input)?;
            Ok((
                input,
                Parsed::plain(i.with_dest(d).with_src1(a).with_src2(b)),
            ))
        }
        Category::IntAlu => {
            let (input, (d, _, a, _, imm)) = tuple((register, sep, register, sep, i64))(input)?;
            Ok((input, Parsed::plain(i.with_dest(d).with_src1(a).with_imm(imm))))
        }
        Category::Load => {
            let (input, (d, (imm, base))) = pair(register, preceded(sep, mem_operand))(input)?;
            Ok((input, Parsed::plain(i.with_dest(d).with_base(base).with_imm(imm))))
        }
        Category::Store => {
            let (input, (v, (imm, base))) = pair(register, preceded(sep, mem_operand))(input)?;
            Ok((input, Parsed::plain(i.with_src1(v).with_base(base).with_imm(imm))))
        }
        Category::Branch => {
            let (input, (a, _, b, _, target)) =
                tuple((register, sep, register, sep, branch_target))(input)?;
            Ok((
                input,
                Parsed {
                    instr: i.with_src1(a).with_src2(b),
                    target: Some(target),
                },
            ))
        }
    }
}

fn line(input: &str) -> IResult<&str, (Option<&str>, Option<Parsed<'_>>)> {
    let (input, _) = space0(input)?;
    let (input, label) = opt(terminated(label, space0))(input)?;
    if input.trim().is_empty() {
        return Ok(("", (label, None)));
    }
    let (input, parsed) = all_consuming(terminated(instruction, space0))(input)?;
    Ok((input, (label, Some(parsed))))
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(i) => &line[..i],
        None => line,
    }
}

pub fn parse(src: &str) -> Assembly {
    let mut warnings = Vec::new();
    let mut labels = BTreeMap::new();
    let mut pending = Vec::new();

    for (n, raw) in src.lines().enumerate() {
        let text = strip_comment(raw).trim();
        if text.is_empty() {
            continue;
        }
        let addr = 4 * pending.len() as i64;
        match line(text) {
            Ok((_, (label, parsed))) => {
                if let Some(l) = label {
                    if labels.insert(l.to_string(), addr).is_some() {
                        warnings.push(format!("line {}: label `{l}` redefined", n + 1));
                    }
                }
                if let Some(Parsed { instr, target }) = parsed {
                    pending.push((instr.at(addr), target, n + 1));
                }
            }
            Err(_) => {
                // a label in front of a bad instruction still names this address
                if let Ok((_, l)) = label(text) {
                    labels.insert(l.to_string(), addr);
                }
                warnings.push(format!("line {}: cannot parse `{text}`, skipped", n + 1));
            }
        }
    }

    let program = pending
        .into_iter()
        .map(|(mut instr, target, n)| {
            if let Some(target) = target {
                instr.imm = match labels.get(target) {
                    Some(&to) => (to - instr.addr - 4) / 4,
                    None => match target.parse::<i64>() {
                        Ok(offset) => offset,
                        Err(_) => {
                            warnings.push(format!(
                                "line {n}: unknown branch target `{target}`, using offset 0"
                            ));
                            0
                        }
                    },
                };
            }
            instr
        })
        .collect();

    for w in &warnings {
        log::warn!("{w}");
    }
    Assembly {
        program,
        labels,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg(s: &str) -> RegId {
        RegId::try_from(s).unwrap()
    }

    #[test]
    fn test_operand_layouts() {
        let a = parse(
            "add.d F2, F4, F6\n\
             ADDI R1,R0,-5\n\
             L.D F0, 16(R1)\n\
             S.S F3 (R2)\n\
             DSUBI R3 R3 1\n",
        );
        assert!(a.warnings.is_empty(), "{:?}", a.warnings);
        let p = &a.program;
        assert_eq!(p.len(), 5);
        assert_eq!(p[0].opcode, Opcode::AddD);
        assert_eq!((p[0].dest, p[0].src1, p[0].src2), (Some(reg("F2")), Some(reg("F4")), Some(reg("F6"))));
        assert_eq!((p[1].src1, p[1].imm), (Some(reg("R0")), -5));
        assert_eq!((p[2].dest, p[2].base, p[2].imm), (Some(reg("F0")), Some(reg("R1")), 16));
        assert_eq!((p[3].src1, p[3].base, p[3].imm), (Some(reg("F3")), Some(reg("R2")), 0));
        assert_eq!(p[4].opcode, Opcode::Dsubi);
        assert_eq!(p.iter().map(|i| i.addr).collect::<Vec<_>>(), vec![0, 4, 8, 12, 16]);
        assert_eq!(p[2].to_string(), "L.D F0, 16(R1)");
    }

    #[test]
    fn test_labels() {
        let a = parse(
            "# countdown\n\
             start: ADDI R1, R0, 3\n\
             loop:\n\
                 SUBI R1, R1, 1   # decrement\n\
                 BNE R1, R0, loop\n\
                 BEQ R0, R0, start\n\
                 BEQ R0, R0, done\n\
             done:\n",
        );
        assert!(a.warnings.is_empty(), "{:?}", a.warnings);
        assert_eq!(a.labels["start"], 0);
        assert_eq!(a.labels["loop"], 4);
        assert_eq!(a.labels["done"], 20);
        // offsets count words from the following instruction
        assert_eq!(a.program[2].imm, -2);
        assert_eq!(a.program[3].imm, -4);
        assert_eq!(a.program[4].imm, 0);
    }

    #[test]
    fn test_numeric_and_unknown_targets() {
        let a = parse("BNE R1, R0, -3\nBEQ R1, R2, nowhere\n");
        assert_eq!(a.program[0].imm, -3);
        assert_eq!(a.program[1].imm, 0);
        assert_eq!(a.warnings.len(), 1);
        assert!(a.warnings[0].contains("nowhere"));
    }

    #[test]
    fn test_bad_lines_skipped() {
        let a = parse("JAL R1\nADD.D F2, F4\nADDI R1, R0, 1\nADD.D F2, F4, X9\n");
        assert_eq!(a.program.len(), 1);
        assert_eq!(a.program[0].opcode, Opcode::Addi);
        assert_eq!(a.program[0].addr, 0);
        assert_eq!(a.warnings.len(), 3);
    }
}
