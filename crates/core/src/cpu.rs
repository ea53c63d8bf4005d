//! AVR CPU core for the ATmega328P.
//!
//! Executes the full AVRe+ instruction set of the part. The execute step
//! runs on [`Runtime`] so that loads and stores reach the memory-mapped
//! peripherals and, through the [`Board`], the attached devices.
//!
//! Flag computation follows the datasheet formulas bit for bit, including
//! the carry chain of SBC/SBCI/CPC where Z is only ever cleared so that
//! multi-byte comparisons work.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::memory::Pointer;
use crate::opcodes::{ImmOp, Instruction, Mode, MulOp, RegOp, UnaryOp};
use crate::runtime::{Board, Runtime};
use crate::{DATA_SIZE, FLASH_SIZE, SREG_C, SREG_I, SREG_T};

/// Flash size in program words
pub const FLASH_WORDS: usize = FLASH_SIZE / 2;

/// Core registers that live outside the data space array.
///
/// R0–R31 are in [`crate::memory::Memory::data`] at 0x00–0x1F; SREG and
/// SP are kept here and mapped onto 0x5F and 0x5D/0x5E by the runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// Program counter (word address)
    pub pc: u16,
    pub sp: u16,
    /// I T H S V N Z C (bits 7..0)
    pub sreg: u8,
    /// Cycles executed since reset
    pub tick: u64,
    /// Set by SLEEP, cleared by the next interrupt
    pub sleeping: bool,
}

impl Cpu {
    pub fn new() -> Self {
        Cpu {
            pc: 0,
            sp: (DATA_SIZE - 1) as u16,
            sreg: 0,
            tick: 0,
            sleeping: false,
        }
    }

    #[inline(always)]
    pub fn flag(&self, bit: u8) -> bool {
        self.sreg & (1 << bit) != 0
    }

    #[inline(always)]
    pub fn set_flag(&mut self, bit: u8, v: bool) {
        if v {
            self.sreg |= 1 << bit;
        } else {
            self.sreg &= !(1 << bit);
        }
    }

    #[inline(always)]
    fn carry(&self) -> u8 {
        self.sreg & 1
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

// --- Flag helpers ---

/// SREG after ADD/ADC.
fn flags_add(cpu: &mut Cpu, rd: u8, rr: u8, r: u8) {
    let (r7, rd7, rr7) = ((r >> 7) & 1, (rd >> 7) & 1, (rr >> 7) & 1);
    let (r3, rd3, rr3) = ((r >> 3) & 1, (rd >> 3) & 1, (rr >> 3) & 1);
    let h = (rd3 & rr3) | (rr3 & (r3 ^ 1)) | ((r3 ^ 1) & rd3);
    let v = (rd7 & rr7 & (r7 ^ 1)) | ((rd7 ^ 1) & (rr7 ^ 1) & r7);
    let c = (rd7 & rr7) | (rr7 & (r7 ^ 1)) | ((r7 ^ 1) & rd7);
    let n = r7;
    let z = (r == 0) as u8;
    let s = n ^ v;
    cpu.sreg = (cpu.sreg & 0b1100_0000) | (h << 5) | (s << 4) | (v << 3) | (n << 2) | (z << 1) | c;
}

/// SREG after SUB/SBC/CP/CPC/NEG.
///
/// With `keep_z` (the carry-in forms) Z can only be cleared.
fn flags_sub(cpu: &mut Cpu, rd: u8, rr: u8, r: u8, keep_z: bool) {
    let (r7, rd7, rr7) = ((r >> 7) & 1, (rd >> 7) & 1, (rr >> 7) & 1);
    let (r3, rd3, rr3) = ((r >> 3) & 1, (rd >> 3) & 1, (rr >> 3) & 1);
    let h = ((rd3 ^ 1) & rr3) | (rr3 & r3) | (r3 & (rd3 ^ 1));
    let v = (rd7 & (rr7 ^ 1) & (r7 ^ 1)) | ((rd7 ^ 1) & rr7 & r7);
    let c = ((rd7 ^ 1) & rr7) | (rr7 & r7) | (r7 & (rd7 ^ 1));
    let n = r7;
    let s = n ^ v;
    let z = if keep_z {
        ((r == 0) as u8) & ((cpu.sreg >> 1) & 1)
    } else {
        (r == 0) as u8
    };
    cpu.sreg = (cpu.sreg & 0b1100_0000) | (h << 5) | (s << 4) | (v << 3) | (n << 2) | (z << 1) | c;
}

/// SREG after AND/OR/EOR/COM. V is cleared.
fn flags_logic(cpu: &mut Cpu, r: u8) {
    let n = (r >> 7) & 1;
    let z = (r == 0) as u8;
    cpu.sreg = (cpu.sreg & 0b1110_0001) | (n << 4) | (n << 2) | (z << 1);
}

/// SREG after the right shifts, given the bit shifted out.
fn flags_shift(cpu: &mut Cpu, r: u8, c: u8) {
    let n = (r >> 7) & 1;
    let v = n ^ c;
    let z = (r == 0) as u8;
    let s = n ^ v;
    cpu.sreg = (cpu.sreg & 0b1110_0000) | (s << 4) | (v << 3) | (n << 2) | (z << 1) | c;
}

/// SREG after INC/DEC; `overflow` is the V condition.
fn flags_step(cpu: &mut Cpu, r: u8, overflow: bool) {
    let n = (r >> 7) & 1;
    let v = overflow as u8;
    let z = (r == 0) as u8;
    let s = n ^ v;
    cpu.sreg = (cpu.sreg & 0b1110_0001) | (s << 4) | (v << 3) | (n << 2) | (z << 1);
}

/// SREG after the multiply family: C is bit 15 of the raw product.
fn flags_mul(cpu: &mut Cpu, product: u16, result: u16) {
    let c = (product >> 15) as u8;
    let z = (result == 0) as u8;
    cpu.sreg = (cpu.sreg & 0b1111_1100) | (z << 1) | c;
}

/// SREG after ADIW/SBIW.
fn flags_word(cpu: &mut Cpu, rdh7: u8, r: u16, add: bool) {
    let r15 = (r >> 15) as u8;
    let (v, c) = if add {
        ((rdh7 ^ 1) & r15, (r15 ^ 1) & rdh7)
    } else {
        (rdh7 & (r15 ^ 1), r15 & (rdh7 ^ 1))
    };
    let n = r15;
    let z = (r == 0) as u8;
    let s = n ^ v;
    cpu.sreg = (cpu.sreg & 0b1110_0000) | (s << 4) | (v << 3) | (n << 2) | (z << 1) | c;
}

#[inline]
fn relative(pc: u16, k: i32) -> u16 {
    (pc as i32 + k) as u16
}

impl Runtime {
    /// Execute one decoded instruction and return its cycle cost.
    ///
    /// PC is advanced past the instruction before it runs, so relative
    /// jumps and return addresses are computed from the next word.
    pub(crate) fn execute_inst(&mut self, inst: Instruction, board: &mut dyn Board) -> Result<u8> {
        use Instruction::*;

        self.cpu.pc = self.cpu.pc.wrapping_add(inst.words() as u16);

        let cycles = match inst {
            Nop | Wdr => 1,

            Reg { op, d, r } => {
                self.exec_reg(op, d, r);
                1
            }
            Imm { op, d, k } => {
                self.exec_imm(op, d, k);
                1
            }
            Unary { op, d } => {
                self.exec_unary(op, d);
                1
            }
            Mul { op, d, r } => {
                self.exec_mul(op, d, r);
                2
            }
            Adiw { d, k } => {
                let val = self.mem.reg_word(d);
                let res = val.wrapping_add(k as u16);
                self.mem.set_reg_word(d, res);
                flags_word(&mut self.cpu, (val >> 15) as u8, res, true);
                2
            }
            Sbiw { d, k } => {
                let val = self.mem.reg_word(d);
                let res = val.wrapping_sub(k as u16);
                self.mem.set_reg_word(d, res);
                flags_word(&mut self.cpu, (val >> 15) as u8, res, false);
                2
            }
            Movw { d, r } => {
                let v = self.mem.reg_word(r);
                self.mem.set_reg_word(d, v);
                1
            }

            // -- Data transfer --
            Ld { d, ptr, mode } => {
                let a = self.effective_addr(ptr, mode);
                let v = self.read_data(a);
                self.mem.set_reg(d, v);
                2
            }
            St { r, ptr, mode } => {
                let a = self.effective_addr(ptr, mode);
                let v = self.mem.reg(r);
                self.write_data(a, v, board);
                2
            }
            Lds { d, k } => {
                let v = self.read_data(k);
                self.mem.set_reg(d, v);
                2
            }
            Sts { k, r } => {
                let v = self.mem.reg(r);
                self.write_data(k, v, board);
                2
            }
            Lpm { d, inc } => {
                let z = self.mem.ptr(Pointer::Z);
                let v = self.mem.flash_byte(z as usize);
                self.mem.set_reg(d, v);
                if inc {
                    self.mem.set_ptr(Pointer::Z, z.wrapping_add(1));
                }
                3
            }
            Push { r } => {
                let v = self.mem.reg(r);
                self.push(v);
                2
            }
            Pop { d } => {
                let v = self.pop();
                self.mem.set_reg(d, v);
                2
            }
            In { d, a } => {
                let v = self.read_data(a);
                self.mem.set_reg(d, v);
                1
            }
            Out { a, r } => {
                let v = self.mem.reg(r);
                self.write_data(a, v, board);
                1
            }
            Sbi { a, b } => {
                self.write_bit(a, b, true, board);
                2
            }
            Cbi { a, b } => {
                self.write_bit(a, b, false, board);
                2
            }

            // -- Bit and flag --
            Bst { d, b } => {
                let v = self.mem.reg(d) & (1 << b) != 0;
                self.cpu.set_flag(SREG_T, v);
                1
            }
            Bld { d, b } => {
                let mut v = self.mem.reg(d);
                if self.cpu.flag(SREG_T) {
                    v |= 1 << b;
                } else {
                    v &= !(1 << b);
                }
                self.mem.set_reg(d, v);
                1
            }
            Bset { s } => {
                self.cpu.set_flag(s, true);
                1
            }
            Bclr { s } => {
                self.cpu.set_flag(s, false);
                1
            }

            // -- Skips --
            Cpse { d, r } => {
                let skip = self.mem.reg(d) == self.mem.reg(r);
                1 + self.skip_if(skip)
            }
            Sbrc { r, b } => {
                let skip = self.mem.reg(r) & (1 << b) == 0;
                1 + self.skip_if(skip)
            }
            Sbrs { r, b } => {
                let skip = self.mem.reg(r) & (1 << b) != 0;
                1 + self.skip_if(skip)
            }
            Sbic { a, b } => {
                let skip = self.read_data(a) & (1 << b) == 0;
                1 + self.skip_if(skip)
            }
            Sbis { a, b } => {
                let skip = self.read_data(a) & (1 << b) != 0;
                1 + self.skip_if(skip)
            }

            // -- Flow control --
            Brbs { s, k } => {
                if self.cpu.flag(s) {
                    self.cpu.pc = relative(self.cpu.pc, k as i32);
                    2
                } else {
                    1
                }
            }
            Brbc { s, k } => {
                if !self.cpu.flag(s) {
                    self.cpu.pc = relative(self.cpu.pc, k as i32);
                    2
                } else {
                    1
                }
            }
            Rjmp { k } => {
                self.cpu.pc = relative(self.cpu.pc, k as i32);
                2
            }
            Rcall { k } => {
                let ret = self.cpu.pc;
                self.push_word(ret);
                self.cpu.pc = relative(self.cpu.pc, k as i32);
                3
            }
            Jmp { k } => {
                self.cpu.pc = Self::jump_target(k)?;
                3
            }
            Call { k } => {
                let ret = self.cpu.pc;
                self.push_word(ret);
                self.cpu.pc = Self::jump_target(k)?;
                4
            }
            Ijmp => {
                self.cpu.pc = self.mem.ptr(Pointer::Z);
                2
            }
            Icall => {
                let ret = self.cpu.pc;
                self.push_word(ret);
                self.cpu.pc = self.mem.ptr(Pointer::Z);
                3
            }
            Ret => {
                self.cpu.pc = self.pop_word();
                4
            }
            Reti => {
                self.cpu.pc = self.pop_word();
                self.cpu.set_flag(SREG_I, true);
                4
            }
            Sleep => {
                self.cpu.sleeping = true;
                1
            }
            Break => {
                log::debug!("BREAK at {:#06x}", self.cpu.pc.wrapping_sub(1));
                1
            }
        };
        Ok(cycles)
    }

    fn jump_target(k: u32) -> Result<u16> {
        if k as usize >= FLASH_WORDS {
            return Err(SimError::PcOutOfRange { pc: k });
        }
        Ok(k as u16)
    }

    fn exec_reg(&mut self, op: RegOp, d: u8, r: u8) {
        let rd = self.mem.reg(d);
        let rr = self.mem.reg(r);
        let c = self.cpu.carry();
        let res = match op {
            RegOp::Add => {
                let res = rd.wrapping_add(rr);
                flags_add(&mut self.cpu, rd, rr, res);
                res
            }
            RegOp::Adc => {
                let res = rd.wrapping_add(rr).wrapping_add(c);
                flags_add(&mut self.cpu, rd, rr, res);
                res
            }
            RegOp::Sub => {
                let res = rd.wrapping_sub(rr);
                flags_sub(&mut self.cpu, rd, rr, res, false);
                res
            }
            RegOp::Sbc => {
                let res = rd.wrapping_sub(rr).wrapping_sub(c);
                flags_sub(&mut self.cpu, rd, rr, res, true);
                res
            }
            RegOp::And => {
                let res = rd & rr;
                flags_logic(&mut self.cpu, res);
                res
            }
            RegOp::Or => {
                let res = rd | rr;
                flags_logic(&mut self.cpu, res);
                res
            }
            RegOp::Eor => {
                let res = rd ^ rr;
                flags_logic(&mut self.cpu, res);
                res
            }
            RegOp::Cp => {
                flags_sub(&mut self.cpu, rd, rr, rd.wrapping_sub(rr), false);
                return;
            }
            RegOp::Cpc => {
                flags_sub(&mut self.cpu, rd, rr, rd.wrapping_sub(rr).wrapping_sub(c), true);
                return;
            }
            RegOp::Mov => rr,
        };
        self.mem.set_reg(d, res);
    }

    fn exec_imm(&mut self, op: ImmOp, d: u8, k: u8) {
        let rd = self.mem.reg(d);
        let c = self.cpu.carry();
        let res = match op {
            ImmOp::Subi => {
                let res = rd.wrapping_sub(k);
                flags_sub(&mut self.cpu, rd, k, res, false);
                res
            }
            ImmOp::Sbci => {
                let res = rd.wrapping_sub(k).wrapping_sub(c);
                flags_sub(&mut self.cpu, rd, k, res, true);
                res
            }
            ImmOp::Andi => {
                let res = rd & k;
                flags_logic(&mut self.cpu, res);
                res
            }
            ImmOp::Ori => {
                let res = rd | k;
                flags_logic(&mut self.cpu, res);
                res
            }
            ImmOp::Cpi => {
                flags_sub(&mut self.cpu, rd, k, rd.wrapping_sub(k), false);
                return;
            }
            ImmOp::Ldi => k,
        };
        self.mem.set_reg(d, res);
    }

    fn exec_unary(&mut self, op: UnaryOp, d: u8) {
        let rd = self.mem.reg(d);
        let res = match op {
            UnaryOp::Com => {
                let res = !rd;
                flags_logic(&mut self.cpu, res);
                self.cpu.set_flag(SREG_C, true);
                res
            }
            UnaryOp::Neg => {
                let res = 0u8.wrapping_sub(rd);
                flags_sub(&mut self.cpu, 0, rd, res, false);
                res
            }
            UnaryOp::Swap => rd.rotate_left(4),
            UnaryOp::Inc => {
                let res = rd.wrapping_add(1);
                flags_step(&mut self.cpu, res, rd == 0x7F);
                res
            }
            UnaryOp::Dec => {
                let res = rd.wrapping_sub(1);
                flags_step(&mut self.cpu, res, rd == 0x80);
                res
            }
            UnaryOp::Asr => {
                let res = ((rd as i8) >> 1) as u8;
                flags_shift(&mut self.cpu, res, rd & 1);
                res
            }
            UnaryOp::Lsr => {
                let res = rd >> 1;
                flags_shift(&mut self.cpu, res, rd & 1);
                res
            }
            UnaryOp::Ror => {
                let res = (rd >> 1) | (self.cpu.carry() << 7);
                flags_shift(&mut self.cpu, res, rd & 1);
                res
            }
        };
        self.mem.set_reg(d, res);
    }

    fn exec_mul(&mut self, op: MulOp, d: u8, r: u8) {
        let rd = self.mem.reg(d);
        let rr = self.mem.reg(r);
        let product = match op {
            MulOp::Mul | MulOp::Fmul => (rd as u16) * (rr as u16),
            MulOp::Muls | MulOp::Fmuls => ((rd as i8 as i16) * (rr as i8 as i16)) as u16,
            MulOp::Mulsu | MulOp::Fmulsu => ((rd as i8 as i16) * (rr as i16)) as u16,
        };
        let result = match op {
            MulOp::Fmul | MulOp::Fmuls | MulOp::Fmulsu => product << 1,
            _ => product,
        };
        self.mem.set_reg_word(0, result);
        flags_mul(&mut self.cpu, product, result);
    }

    fn effective_addr(&mut self, ptr: Pointer, mode: Mode) -> u16 {
        let base = self.mem.ptr(ptr);
        match mode {
            Mode::Plain => base,
            Mode::Disp(q) => base.wrapping_add(q as u16),
            Mode::PostInc => {
                self.mem.set_ptr(ptr, base.wrapping_add(1));
                base
            }
            Mode::PreDec => {
                let a = base.wrapping_sub(1);
                self.mem.set_ptr(ptr, a);
                a
            }
        }
    }

    /// Skip the next instruction when `cond` holds. Returns the extra cycles.
    fn skip_if(&mut self, cond: bool) -> u8 {
        if !cond {
            return 0;
        }
        let next = self.mem.program_word(self.cpu.pc as usize);
        let words = if crate::opcodes::is_two_word(next) { 2 } else { 1 };
        self.cpu.pc = self.cpu.pc.wrapping_add(words);
        words as u8
    }

    fn push(&mut self, v: u8) {
        self.mem.write_raw(self.cpu.sp, v);
        self.cpu.sp = self.cpu.sp.wrapping_sub(1);
    }

    fn pop(&mut self) -> u8 {
        self.cpu.sp = self.cpu.sp.wrapping_add(1);
        self.mem.read_raw(self.cpu.sp)
    }

    /// Push a return address, high byte at the higher address.
    pub(crate) fn push_word(&mut self, val: u16) {
        self.push(val as u8);
        self.push((val >> 8) as u8);
    }

    fn pop_word(&mut self) -> u16 {
        let hi = self.pop();
        let lo = self.pop();
        u16::from_be_bytes([hi, lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::NullBoard;
    use crate::{SREG_H, SREG_N, SREG_S, SREG_V, SREG_Z};

    fn run(rt: &mut Runtime, inst: Instruction) -> u8 {
        rt.execute_inst(inst, &mut NullBoard).unwrap()
    }

    fn add(d: u8, r: u8) -> Instruction {
        Instruction::Reg { op: RegOp::Add, d, r }
    }

    #[test]
    fn test_add_with_carry_out() {
        let mut rt = Runtime::new();
        rt.mem.set_reg(0, 200);
        rt.mem.set_reg(1, 100);
        run(&mut rt, add(0, 1));
        assert_eq!(rt.mem.reg(0), 44);
        assert!(rt.cpu.flag(SREG_C));
        assert!(!rt.cpu.flag(SREG_Z));
    }

    #[test]
    fn test_add_half_carry_and_overflow() {
        let mut rt = Runtime::new();
        rt.mem.set_reg(2, 0x7F);
        rt.mem.set_reg(3, 0x01);
        run(&mut rt, add(2, 3));
        assert_eq!(rt.mem.reg(2), 0x80);
        assert!(rt.cpu.flag(SREG_H));
        assert!(rt.cpu.flag(SREG_V));
        assert!(rt.cpu.flag(SREG_N));
        assert!(!rt.cpu.flag(SREG_S));
    }

    #[test]
    fn test_subi_sbci_chain_increments_32bit() {
        let mut rt = Runtime::new();
        for (r, v) in [(24, 0xFF), (25, 0x00), (26, 0x00), (27, 0x00)] {
            rt.mem.set_reg(r, v);
        }
        run(&mut rt, Instruction::Imm { op: ImmOp::Subi, d: 24, k: 0xFF });
        for d in 25..=27 {
            run(&mut rt, Instruction::Imm { op: ImmOp::Sbci, d, k: 0xFF });
        }
        let v = u32::from_le_bytes([rt.mem.reg(24), rt.mem.reg(25), rt.mem.reg(26), rt.mem.reg(27)]);
        // Subtracting 0xFFFFFFFF adds one
        assert_eq!(v, 0x0000_0100);
    }

    #[test]
    fn test_cpc_keeps_z_across_bytes() {
        let mut rt = Runtime::new();
        // 0x0100 vs 0x0100: equal after CP + CPC
        rt.mem.set_reg_word(20, 0x0100);
        rt.mem.set_reg_word(22, 0x0100);
        run(&mut rt, Instruction::Reg { op: RegOp::Cp, d: 20, r: 22 });
        run(&mut rt, Instruction::Reg { op: RegOp::Cpc, d: 21, r: 23 });
        assert!(rt.cpu.flag(SREG_Z));
        // 0x0100 vs 0x00FF: low bytes differ, Z stays clear
        rt.mem.set_reg_word(22, 0x00FF);
        run(&mut rt, Instruction::Reg { op: RegOp::Cp, d: 20, r: 22 });
        run(&mut rt, Instruction::Reg { op: RegOp::Cpc, d: 21, r: 23 });
        assert!(!rt.cpu.flag(SREG_Z));
        assert!(!rt.cpu.flag(SREG_C));
    }

    #[test]
    fn test_push_pop_and_call_return() {
        let mut rt = Runtime::new();
        let sp0 = rt.cpu.sp;
        rt.mem.set_reg(5, 0x42);
        run(&mut rt, Instruction::Push { r: 5 });
        assert_eq!(rt.cpu.sp, sp0 - 1);
        run(&mut rt, Instruction::Pop { d: 10 });
        assert_eq!(rt.mem.reg(10), 0x42);

        rt.cpu.pc = 0x100;
        assert_eq!(run(&mut rt, Instruction::Rcall { k: 5 }), 3);
        assert_eq!(rt.cpu.pc, 0x106);
        assert_eq!(rt.cpu.sp, sp0 - 2);
        assert_eq!(run(&mut rt, Instruction::Ret), 4);
        assert_eq!(rt.cpu.pc, 0x101);
        assert_eq!(rt.cpu.sp, sp0);
    }

    #[test]
    fn test_branch_cycles() {
        let mut rt = Runtime::new();
        rt.cpu.pc = 0x50;
        rt.cpu.set_flag(SREG_Z, true);
        assert_eq!(run(&mut rt, Instruction::Brbs { s: SREG_Z, k: 3 }), 2);
        assert_eq!(rt.cpu.pc, 0x54);
        assert_eq!(run(&mut rt, Instruction::Brbc { s: SREG_Z, k: 3 }), 1);
        assert_eq!(rt.cpu.pc, 0x55);
    }

    #[test]
    fn test_skip_over_two_word_instruction() {
        let mut rt = Runtime::new();
        // CPSE r0, r0 followed by JMP
        rt.mem.load_program(&[0x00, 0x10, 0x0C, 0x94, 0x00, 0x00]);
        rt.cpu.pc = 0;
        assert_eq!(run(&mut rt, Instruction::Cpse { d: 0, r: 0 }), 3);
        assert_eq!(rt.cpu.pc, 3);
    }

    #[test]
    fn test_lpm_post_increment() {
        let mut rt = Runtime::new();
        rt.mem.flash[0x100] = 0x42;
        rt.mem.set_ptr(Pointer::Z, 0x100);
        assert_eq!(run(&mut rt, Instruction::Lpm { d: 5, inc: true }), 3);
        assert_eq!(rt.mem.reg(5), 0x42);
        assert_eq!(rt.mem.ptr(Pointer::Z), 0x101);
    }

    #[test]
    fn test_mul_and_fmul() {
        let mut rt = Runtime::new();
        rt.mem.set_reg(2, 200);
        rt.mem.set_reg(3, 200);
        run(&mut rt, Instruction::Mul { op: MulOp::Mul, d: 2, r: 3 });
        assert_eq!(rt.mem.reg_word(0), 40_000);
        assert!(rt.cpu.flag(SREG_C));

        rt.mem.set_reg(16, 0x40);
        rt.mem.set_reg(17, 0x40);
        run(&mut rt, Instruction::Mul { op: MulOp::Fmul, d: 16, r: 17 });
        // 0.5 * 0.5 in 1.7 format = 0.25 in 1.15
        assert_eq!(rt.mem.reg_word(0), 0x2000);
        assert!(!rt.cpu.flag(SREG_C));
    }

    #[test]
    fn test_adiw_sbiw() {
        let mut rt = Runtime::new();
        rt.mem.set_ptr(Pointer::Z, 0x1000);
        run(&mut rt, Instruction::Adiw { d: 30, k: 5 });
        assert_eq!(rt.mem.ptr(Pointer::Z), 0x1005);
        rt.mem.set_reg_word(24, 0);
        run(&mut rt, Instruction::Sbiw { d: 24, k: 1 });
        assert_eq!(rt.mem.reg_word(24), 0xFFFF);
        assert!(rt.cpu.flag(SREG_C));
        assert!(rt.cpu.flag(SREG_N));
    }

    #[test]
    fn test_ld_st_addressing_modes() {
        let mut rt = Runtime::new();
        rt.mem.set_ptr(Pointer::X, 0x200);
        rt.mem.set_reg(1, 0xAB);
        run(&mut rt, Instruction::St { r: 1, ptr: Pointer::X, mode: Mode::PostInc });
        assert_eq!(rt.mem.data[0x200], 0xAB);
        assert_eq!(rt.mem.ptr(Pointer::X), 0x201);
        run(&mut rt, Instruction::Ld { d: 2, ptr: Pointer::X, mode: Mode::PreDec });
        assert_eq!(rt.mem.reg(2), 0xAB);
        assert_eq!(rt.mem.ptr(Pointer::X), 0x200);
        rt.mem.set_ptr(Pointer::Y, 0x1FE);
        run(&mut rt, Instruction::Ld { d: 3, ptr: Pointer::Y, mode: Mode::Disp(2) });
        assert_eq!(rt.mem.reg(3), 0xAB);
    }

    #[test]
    fn test_out_in_sreg() {
        let mut rt = Runtime::new();
        rt.mem.set_reg(16, 0x42);
        run(&mut rt, Instruction::Out { a: crate::SREG_ADDR, r: 16 });
        assert_eq!(rt.cpu.sreg, 0x42);
        run(&mut rt, Instruction::In { d: 17, a: crate::SREG_ADDR });
        assert_eq!(rt.mem.reg(17), 0x42);
    }

    #[test]
    fn test_jump_beyond_flash_faults() {
        let mut rt = Runtime::new();
        let err = rt.execute_inst(Instruction::Jmp { k: 0x20000 }, &mut NullBoard);
        assert!(matches!(err, Err(SimError::PcOutOfRange { pc: 0x20000 })));
    }

    #[test]
    fn test_neg_and_com_flags() {
        let mut rt = Runtime::new();
        rt.mem.set_reg(4, 0x01);
        run(&mut rt, Instruction::Unary { op: UnaryOp::Neg, d: 4 });
        assert_eq!(rt.mem.reg(4), 0xFF);
        assert!(rt.cpu.flag(SREG_C));
        run(&mut rt, Instruction::Unary { op: UnaryOp::Com, d: 4 });
        assert_eq!(rt.mem.reg(4), 0x00);
        assert!(rt.cpu.flag(SREG_Z));
        assert!(rt.cpu.flag(SREG_C));
    }
}
