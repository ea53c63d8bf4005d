//! AVR instruction decoder for the ATmega328P.
//!
//! Turns a 16-bit instruction word (plus the following word for the four
//! 32-bit forms) into a typed [`Instruction`]. Related opcodes share a
//! variant with an operation selector so the executor can dispatch on the
//! addressing shape first. Words that are not valid on this core decode to
//! `None`.
//!
//! I/O operands (`IN`, `OUT`, `SBI`, `CBI`, `SBIC`, `SBIS`) are returned as
//! data-space addresses (I/O address + 0x20).

use crate::memory::Pointer;

/// Two-register ALU operations (`op Rd, Rr`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegOp {
    Add,
    Adc,
    Sub,
    Sbc,
    And,
    Or,
    Eor,
    Cp,
    Cpc,
    Mov,
}

/// Register-immediate operations on R16–R31.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImmOp {
    Subi,
    Sbci,
    Andi,
    Ori,
    Cpi,
    Ldi,
}

/// Single-register read-modify-write operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Com,
    Neg,
    Swap,
    Inc,
    Dec,
    Asr,
    Lsr,
    Ror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MulOp {
    Mul,
    Muls,
    Mulsu,
    Fmul,
    Fmuls,
    Fmulsu,
}

/// Pointer addressing mode for LD/ST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Plain,
    PostInc,
    PreDec,
    Disp(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Reg { op: RegOp, d: u8, r: u8 },
    Imm { op: ImmOp, d: u8, k: u8 },
    Unary { op: UnaryOp, d: u8 },
    Mul { op: MulOp, d: u8, r: u8 },
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    Movw { d: u8, r: u8 },
    Ld { d: u8, ptr: Pointer, mode: Mode },
    St { r: u8, ptr: Pointer, mode: Mode },
    Lds { d: u8, k: u16 },
    Sts { k: u16, r: u8 },
    /// `LPM` family; `d = 0, inc = false` is the implied-operand form
    Lpm { d: u8, inc: bool },
    Push { r: u8 },
    Pop { d: u8 },
    In { d: u8, a: u16 },
    Out { a: u16, r: u8 },
    Sbi { a: u16, b: u8 },
    Cbi { a: u16, b: u8 },
    Sbic { a: u16, b: u8 },
    Sbis { a: u16, b: u8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Cpse { d: u8, r: u8 },
    Bst { d: u8, b: u8 },
    Bld { d: u8, b: u8 },
    Bset { s: u8 },
    Bclr { s: u8 },
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Icall,
    Ret,
    Reti,
    Sleep,
    Wdr,
    Break,
}

impl Instruction {
    /// Size in program words.
    pub fn words(&self) -> u8 {
        match self {
            Instruction::Lds { .. }
            | Instruction::Sts { .. }
            | Instruction::Jmp { .. }
            | Instruction::Call { .. } => 2,
            _ => 1,
        }
    }
}

/// Whether `word` is the first half of a 32-bit instruction.
pub fn is_two_word(word: u16) -> bool {
    word & 0xFC0F == 0x9000 || word & 0xFE0C == 0x940C
}

#[inline]
fn rd5(word: u16) -> u8 {
    ((word >> 4) & 0x1F) as u8
}

#[inline]
fn rr5(word: u16) -> u8 {
    (((word >> 5) & 0x10) | (word & 0x0F)) as u8
}

#[inline]
fn k8(word: u16) -> u8 {
    (((word >> 4) & 0xF0) | (word & 0x0F)) as u8
}

#[inline]
fn rd_hi(word: u16) -> u8 {
    16 + ((word >> 4) & 0x0F) as u8
}

/// Decode one instruction. `next` is only consumed by 32-bit forms.
pub fn decode(word: u16, next: u16) -> Option<Instruction> {
    use Instruction::*;

    let d = rd5(word);
    let r = rr5(word);

    let inst = match word >> 12 {
        0x0 => match word >> 10 {
            0b00_0000 => match word >> 8 {
                0x00 if word == 0 => Nop,
                0x01 => Movw { d: ((word >> 4) & 0xF) as u8 * 2, r: (word & 0xF) as u8 * 2 },
                0x02 => Mul { op: MulOp::Muls, d: rd_hi(word), r: 16 + (word & 0xF) as u8 },
                0x03 => {
                    let d = 16 + ((word >> 4) & 7) as u8;
                    let r = 16 + (word & 7) as u8;
                    let op = match word & 0x88 {
                        0x00 => MulOp::Mulsu,
                        0x08 => MulOp::Fmul,
                        0x80 => MulOp::Fmuls,
                        _ => MulOp::Fmulsu,
                    };
                    Mul { op, d, r }
                }
                _ => return None,
            },
            0b00_0001 => Reg { op: RegOp::Cpc, d, r },
            0b00_0010 => Reg { op: RegOp::Sbc, d, r },
            _ => Reg { op: RegOp::Add, d, r },
        },
        0x1 => match (word >> 10) & 3 {
            0 => Cpse { d, r },
            1 => Reg { op: RegOp::Cp, d, r },
            2 => Reg { op: RegOp::Sub, d, r },
            _ => Reg { op: RegOp::Adc, d, r },
        },
        0x2 => {
            let op = match (word >> 10) & 3 {
                0 => RegOp::And,
                1 => RegOp::Eor,
                2 => RegOp::Or,
                _ => RegOp::Mov,
            };
            Reg { op, d, r }
        }
        0x3 => Imm { op: ImmOp::Cpi, d: rd_hi(word), k: k8(word) },
        0x4 => Imm { op: ImmOp::Sbci, d: rd_hi(word), k: k8(word) },
        0x5 => Imm { op: ImmOp::Subi, d: rd_hi(word), k: k8(word) },
        0x6 => Imm { op: ImmOp::Ori, d: rd_hi(word), k: k8(word) },
        0x7 => Imm { op: ImmOp::Andi, d: rd_hi(word), k: k8(word) },
        0x8 | 0xA => {
            // LDD/STD: 10q0 qqsd dddd yqqq
            let q = (((word >> 8) & 0x20) | ((word >> 7) & 0x18) | (word & 7)) as u8;
            let ptr = if word & 0x0008 != 0 { Pointer::Y } else { Pointer::Z };
            let mode = if q == 0 { Mode::Plain } else { Mode::Disp(q) };
            if word & 0x0200 != 0 {
                St { r: d, ptr, mode }
            } else {
                Ld { d, ptr, mode }
            }
        }
        0x9 => return decode_1001(word, next),
        0xB => {
            let a = ((((word >> 5) & 0x30) | (word & 0x0F)) + 0x20) as u16;
            if word & 0x0800 != 0 {
                Out { a, r: d }
            } else {
                In { d, a }
            }
        }
        0xC => Rjmp { k: sign_extend_12(word) },
        0xD => Rcall { k: sign_extend_12(word) },
        0xE => Imm { op: ImmOp::Ldi, d: rd_hi(word), k: k8(word) },
        _ => return decode_1111(word),
    };
    Some(inst)
}

fn decode_1001(word: u16, next: u16) -> Option<Instruction> {
    use Instruction::*;

    let d = rd5(word);
    let inst = match (word >> 9) & 7 {
        // 1001 000d dddd xxxx: loads
        0b000 => match word & 0xF {
            0x0 => Lds { d, k: next },
            0x1 => Ld { d, ptr: Pointer::Z, mode: Mode::PostInc },
            0x2 => Ld { d, ptr: Pointer::Z, mode: Mode::PreDec },
            0x4 => Lpm { d, inc: false },
            0x5 => Lpm { d, inc: true },
            0x9 => Ld { d, ptr: Pointer::Y, mode: Mode::PostInc },
            0xA => Ld { d, ptr: Pointer::Y, mode: Mode::PreDec },
            0xC => Ld { d, ptr: Pointer::X, mode: Mode::Plain },
            0xD => Ld { d, ptr: Pointer::X, mode: Mode::PostInc },
            0xE => Ld { d, ptr: Pointer::X, mode: Mode::PreDec },
            0xF => Pop { d },
            _ => return None,
        },
        // 1001 001r rrrr xxxx: stores
        0b001 => match word & 0xF {
            0x0 => Sts { k: next, r: d },
            0x1 => St { r: d, ptr: Pointer::Z, mode: Mode::PostInc },
            0x2 => St { r: d, ptr: Pointer::Z, mode: Mode::PreDec },
            0x9 => St { r: d, ptr: Pointer::Y, mode: Mode::PostInc },
            0xA => St { r: d, ptr: Pointer::Y, mode: Mode::PreDec },
            0xC => St { r: d, ptr: Pointer::X, mode: Mode::Plain },
            0xD => St { r: d, ptr: Pointer::X, mode: Mode::PostInc },
            0xE => St { r: d, ptr: Pointer::X, mode: Mode::PreDec },
            0xF => Push { r: d },
            _ => return None,
        },
        // 1001 010x xxxx xxxx: one-operand, flag and flow-control group
        0b010 => match word & 0xF {
            0x0 => Unary { op: UnaryOp::Com, d },
            0x1 => Unary { op: UnaryOp::Neg, d },
            0x2 => Unary { op: UnaryOp::Swap, d },
            0x3 => Unary { op: UnaryOp::Inc, d },
            0x5 => Unary { op: UnaryOp::Asr, d },
            0x6 => Unary { op: UnaryOp::Lsr, d },
            0x7 => Unary { op: UnaryOp::Ror, d },
            0xA => Unary { op: UnaryOp::Dec, d },
            0x8 => return decode_misc(word),
            0x9 => match word {
                0x9409 => Ijmp,
                0x9509 => Icall,
                _ => return None,
            },
            0xC | 0xD | 0xE | 0xF => {
                let hi = (((word >> 3) & 0x3E) | (word & 1)) as u32;
                let k = (hi << 16) | next as u32;
                if word & 0x2 != 0 {
                    Call { k }
                } else {
                    Jmp { k }
                }
            }
            _ => return None,
        },
        0b011 => {
            let d = 24 + ((word >> 3) & 0x6) as u8;
            let k = (((word >> 2) & 0x30) | (word & 0x0F)) as u8;
            if word & 0x0100 != 0 {
                Sbiw { d, k }
            } else {
                Adiw { d, k }
            }
        }
        0b100 | 0b101 => {
            let a = ((word >> 3) & 0x1F) + 0x20;
            let b = (word & 7) as u8;
            match (word >> 8) & 3 {
                0 => Cbi { a, b },
                1 => Sbic { a, b },
                2 => Sbi { a, b },
                _ => Sbis { a, b },
            }
        }
        _ => Mul { op: MulOp::Mul, d, r: rr5(word) },
    };
    Some(inst)
}

/// 1001 010x xxxx 1000: BSET/BCLR, returns, SLEEP, BREAK, WDR, LPM R0.
fn decode_misc(word: u16) -> Option<Instruction> {
    use Instruction::*;

    if word & 0xFF0F == 0x9408 {
        let s = ((word >> 4) & 7) as u8;
        return Some(if word & 0x0080 != 0 { Bclr { s } } else { Bset { s } });
    }
    let inst = match word {
        0x9508 => Ret,
        0x9518 => Reti,
        0x9588 => Sleep,
        0x9598 => Break,
        0x95A8 => Wdr,
        0x95C8 => Lpm { d: 0, inc: false },
        _ => return None,
    };
    Some(inst)
}

fn decode_1111(word: u16) -> Option<Instruction> {
    use Instruction::*;

    let s = (word & 7) as u8;
    let inst = match (word >> 9) & 7 {
        0b000 | 0b001 => Brbs { s, k: branch_offset(word) },
        0b010 | 0b011 => Brbc { s, k: branch_offset(word) },
        _ if word & 0x0008 != 0 => return None,
        0b100 => Bld { d: rd5(word), b: s },
        0b101 => Bst { d: rd5(word), b: s },
        0b110 => Sbrc { r: rd5(word), b: s },
        _ => Sbrs { r: rd5(word), b: s },
    };
    Some(inst)
}

#[inline]
fn branch_offset(word: u16) -> i8 {
    // 7-bit signed field in bits 9..3
    (((word >> 3) & 0x7F) as i8) << 1 >> 1
}

#[inline]
fn sign_extend_12(word: u16) -> i16 {
    ((word << 4) as i16) >> 4
}
