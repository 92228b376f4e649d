use proptest::prelude::*;

use crate::*;

fn reg(index: u32) -> Register {
    Register::new(index)
}

/// One instance of every instruction, in opcode order.
fn all_instructions() -> Vec<Instruction> {
    use Instruction::*;

    vec![
        LoadNull { target: reg(0) },
        LoadFalse { target: reg(1) },
        LoadTrue { target: reg(2) },
        LoadInt {
            constant: -7,
            target: reg(0),
        },
        LoadFloat {
            constant: 0.5,
            target: reg(0),
        },
        LoadParam {
            source: Param::new(0),
            target: reg(1),
        },
        StoreParam {
            source: reg(1),
            target: Param::new(0),
        },
        LoadModule {
            source: MemberId::new(3),
            target: reg(0),
        },
        StoreModule {
            source: reg(0),
            target: MemberId::new(3),
        },
        LoadMember {
            object: reg(0),
            name: MemberId::new(4),
            target: reg(1),
        },
        StoreMember {
            source: reg(1),
            object: reg(0),
            name: MemberId::new(4),
        },
        LoadTupleMember {
            tuple: reg(0),
            index: 2,
            target: reg(1),
        },
        StoreTupleMember {
            source: reg(1),
            tuple: reg(0),
            index: 2,
        },
        LoadIndex {
            array: reg(0),
            index: reg(1),
            target: reg(2),
        },
        StoreIndex {
            source: reg(2),
            array: reg(0),
            index: reg(1),
        },
        LoadClosure { target: reg(0) },
        LoadEnv {
            env: reg(0),
            level: 1,
            index: 2,
            target: reg(1),
        },
        StoreEnv {
            source: reg(1),
            env: reg(0),
            level: 1,
            index: 2,
        },
        Add {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Sub {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Mul {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Div {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Mod {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Pow {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        UAdd {
            value: reg(0),
            target: reg(1),
        },
        UNeg {
            value: reg(0),
            target: reg(1),
        },
        LSh {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        RSh {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        BAnd {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        BOr {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        BXor {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        BNot {
            value: reg(0),
            target: reg(1),
        },
        Gt {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Gte {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Lt {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Lte {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        Eq {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        NEq {
            lhs: reg(0),
            rhs: reg(1),
            target: reg(2),
        },
        LNot {
            value: reg(0),
            target: reg(1),
        },
        Array {
            count: 3,
            target: reg(0),
        },
        Tuple {
            count: 2,
            target: reg(0),
        },
        Set {
            count: 1,
            target: reg(0),
        },
        Map {
            count: 4,
            target: reg(0),
        },
        Env {
            parent: reg(0),
            size: 2,
            target: reg(1),
        },
        Closure {
            template: MemberId::new(5),
            env: reg(0),
            target: reg(1),
        },
        Record {
            template: MemberId::new(6),
            target: reg(0),
        },
        Iterator {
            container: reg(0),
            target: reg(1),
        },
        IteratorNext {
            iterator: reg(1),
            valid: reg(2),
            value: reg(3),
        },
        Formatter { target: reg(0) },
        AppendFormat {
            value: reg(1),
            formatter: reg(0),
        },
        FormatResult {
            formatter: reg(0),
            target: reg(1),
        },
        Copy {
            source: reg(0),
            target: reg(1),
        },
        Swap { a: reg(0), b: reg(1) },
        Push { value: reg(0) },
        Pop {},
        PopTo { target: reg(0) },
        Jmp {
            offset: Offset::new(0),
        },
        JmpTrue {
            condition: reg(0),
            offset: Offset::new(0),
        },
        JmpFalse {
            condition: reg(0),
            offset: Offset::new(0),
        },
        JmpNull {
            condition: reg(0),
            offset: Offset::new(0),
        },
        JmpNotNull {
            condition: reg(0),
            offset: Offset::new(0),
        },
        Call {
            function: reg(0),
            count: 2,
        },
        LoadMethod {
            object: reg(0),
            name: MemberId::new(4),
            this: reg(1),
            method: reg(2),
        },
        CallMethod {
            method: reg(2),
            count: 1,
        },
        Return { value: reg(0) },
        Rethrow {},
        AssertFail {
            expr: reg(0),
            message: reg(1),
        },
    ]
}

#[test]
fn covers_every_opcode_in_order() {
    let instructions = all_instructions();
    assert_eq!(instructions.len(), OP_COUNT as usize);
    for (i, ins) in instructions.iter().enumerate() {
        assert_eq!(ins.op() as u8, i as u8 + 1);
    }
}

#[test]
fn every_instruction_round_trips() {
    for ins in all_instructions() {
        let bytes = ins.to_bytes();
        assert_eq!(bytes.len(), 1 + ins.op().operand_bytes());

        let decoded = BytecodeReader::new(&bytes).read().unwrap();
        assert_eq!(decoded, ins);
        assert_eq!(decoded.to_bytes(), bytes);
    }
}

#[test]
fn sequences_round_trip_byte_for_byte() {
    let mut code = Vec::new();
    for ins in all_instructions() {
        code.extend_from_slice(&ins.to_bytes());
    }

    let mut reencoded = Vec::new();
    for ins in BytecodeReader::new(&code) {
        reencoded.extend_from_slice(&ins.unwrap().to_bytes());
    }
    assert_eq!(reencoded, code);
}

proptest! {
    /// Any operand byte pattern after a valid tag decodes, and re-encoding
    /// reproduces the exact input bytes.
    #[test]
    fn arbitrary_operand_bytes_round_trip(
        tag in 1..=OP_COUNT,
        payload in proptest::collection::vec(any::<u8>(), 16),
    ) {
        let op = Op::from_u8(tag).unwrap();
        let mut code = vec![tag];
        code.extend_from_slice(&payload[..op.operand_bytes()]);

        let ins = BytecodeReader::new(&code).read().unwrap();
        prop_assert_eq!(ins.op(), op);
        prop_assert_eq!(ins.to_bytes(), code);
    }
}
