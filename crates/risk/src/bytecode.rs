// In crates/risk/src/bytecode.rs

//! Static inspection of EVM runtime bytecode.
//!
//! The scanner walks opcodes (skipping PUSH immediates so data bytes are never
//! mistaken for instructions) and records the patterns the contract analyzers
//! turn into risk factors. Everything here is heuristic: a flag means "worth a
//! closer look", not "proven vulnerable".

pub mod op {
    pub const ADD: u8 = 0x01;
    pub const MUL: u8 = 0x02;
    pub const SUB: u8 = 0x03;
    pub const EXP: u8 = 0x0a;
    pub const LT: u8 = 0x10;
    pub const GT: u8 = 0x11;
    pub const SLT: u8 = 0x12;
    pub const SGT: u8 = 0x13;
    pub const ISZERO: u8 = 0x15;
    pub const CALLER: u8 = 0x33;
    pub const SSTORE: u8 = 0x55;
    pub const JUMPI: u8 = 0x57;
    pub const PUSH1: u8 = 0x60;
    pub const PUSH4: u8 = 0x63;
    pub const PUSH32: u8 = 0x7f;
    pub const CREATE: u8 = 0xf0;
    pub const CALL: u8 = 0xf1;
    pub const CALLCODE: u8 = 0xf2;
    pub const DELEGATECALL: u8 = 0xf4;
    pub const CREATE2: u8 = 0xf5;
    pub const REVERT: u8 = 0xfd;
    pub const SELFDESTRUCT: u8 = 0xff;
}

/// Number of instructions after a CALL within which the result must be tested.
const CALL_CHECK_WINDOW: usize = 6;

/// Runtime prefix of an EIP-1167 minimal proxy.
const MINIMAL_PROXY_PREFIX: [u8; 10] = [0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d, 0x3d, 0x36, 0x3d, 0x73];

/// `bytes32(uint256(keccak256("eip1967.proxy.implementation")) - 1)`.
const EIP1967_IMPLEMENTATION_SLOT: &str =
    "360894a13ba1a3210667c828492db98dca3e2076cc3735a920a3ca505d382bbc";

/// Function selectors that mint supply when exposed publicly.
const MINT_SELECTORS: [(&str, [u8; 4]); 3] = [
    ("mint(address,uint256)", [0x40, 0xc1, 0x0f, 0x19]),
    ("mint(uint256)", [0xa0, 0x71, 0x2d, 0x68]),
    ("mintTo(address,uint256)", [0x44, 0x9a, 0x52, 0xf8]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction<'a> {
    pub offset: usize,
    pub opcode: u8,
    pub immediate: &'a [u8],
}

/// Splits bytecode into instructions. A truncated trailing PUSH keeps whatever
/// immediate bytes remain.
pub fn disassemble(code: &[u8]) -> Vec<Instruction<'_>> {
    let mut instructions = Vec::with_capacity(code.len());
    let mut pc = 0;
    while pc < code.len() {
        let opcode = code[pc];
        let push_len = if (op::PUSH1..=op::PUSH32).contains(&opcode) {
            (opcode - op::PUSH1 + 1) as usize
        } else {
            0
        };
        let start = pc + 1;
        let end = (start + push_len).min(code.len());
        instructions.push(Instruction {
            offset: pc,
            opcode,
            immediate: &code[start..end],
        });
        pc = end.max(start);
    }
    instructions
}

/// Everything the contract analyzers want to know about a piece of bytecode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BytecodeReport {
    pub size: usize,
    pub has_selfdestruct: bool,
    pub has_delegatecall: bool,
    pub has_callcode: bool,
    pub has_create: bool,
    pub has_create2: bool,
    pub external_calls: usize,
    pub unchecked_calls: usize,
    /// A storage write follows an external call somewhere in the code.
    pub sstore_after_call: bool,
    pub arithmetic_ops: usize,
    pub comparison_ops: usize,
    pub revert_count: usize,
    pub caller_checks: usize,
    pub is_minimal_proxy: bool,
    pub has_eip1967_slot: bool,
    pub selectors: Vec<[u8; 4]>,
}

impl BytecodeReport {
    pub fn is_proxy(&self) -> bool {
        self.is_minimal_proxy || (self.has_eip1967_slot && self.has_delegatecall)
    }

    pub fn reentrancy_risk(&self) -> bool {
        self.external_calls > 0 && self.sstore_after_call
    }

    /// Arithmetic with no comparisons at all suggests pre-0.8 code without SafeMath.
    pub fn unchecked_arithmetic(&self) -> bool {
        self.arithmetic_ops > 0 && self.comparison_ops == 0
    }

    /// REVERT and CALLER occurrences per KiB, a rough gauge of sender-gated exits.
    pub fn honeypot_density(&self) -> f64 {
        if self.size == 0 {
            return 0.0;
        }
        (self.revert_count + self.caller_checks) as f64 / (self.size as f64 / 1024.0)
    }

    pub fn mint_signatures(&self) -> Vec<&'static str> {
        MINT_SELECTORS
            .iter()
            .filter(|(_, selector)| self.selectors.contains(selector))
            .map(|(signature, _)| *signature)
            .collect()
    }

    pub fn dangerous_opcode_count(&self) -> usize {
        [
            self.has_selfdestruct,
            self.has_delegatecall,
            self.has_callcode,
            self.has_create,
            self.has_create2,
        ]
        .iter()
        .filter(|flag| **flag)
        .count()
    }
}

pub fn analyze(code: &[u8]) -> BytecodeReport {
    let instructions = disassemble(code);
    let mut report = BytecodeReport {
        size: code.len(),
        is_minimal_proxy: code.starts_with(&MINIMAL_PROXY_PREFIX),
        ..Default::default()
    };

    let mut seen_call = false;
    for (index, instruction) in instructions.iter().enumerate() {
        match instruction.opcode {
            op::SELFDESTRUCT => report.has_selfdestruct = true,
            op::DELEGATECALL => report.has_delegatecall = true,
            op::CALLCODE => report.has_callcode = true,
            op::CREATE => report.has_create = true,
            op::CREATE2 => report.has_create2 = true,
            op::CALL => {
                report.external_calls += 1;
                seen_call = true;
                let checked = instructions[index + 1..]
                    .iter()
                    .take(CALL_CHECK_WINDOW)
                    .any(|next| next.opcode == op::ISZERO || next.opcode == op::JUMPI);
                if !checked {
                    report.unchecked_calls += 1;
                }
            }
            op::SSTORE if seen_call => report.sstore_after_call = true,
            op::ADD | op::MUL | op::SUB | op::EXP => report.arithmetic_ops += 1,
            op::LT | op::GT | op::SLT | op::SGT => report.comparison_ops += 1,
            op::REVERT => report.revert_count += 1,
            op::CALLER => report.caller_checks += 1,
            op::PUSH4 if instruction.immediate.len() == 4 => {
                let mut selector = [0u8; 4];
                selector.copy_from_slice(instruction.immediate);
                report.selectors.push(selector);
            }
            op::PUSH32 if hex::encode(instruction.immediate) == EIP1967_IMPLEMENTATION_SLOT => {
                report.has_eip1967_slot = true;
            }
            _ => {}
        }
    }
    report
}
