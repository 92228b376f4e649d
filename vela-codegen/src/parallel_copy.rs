//! Sequentialization of parallel copies.

use std::collections::HashMap;

use vela_types::Register;

use crate::locations::RegisterCopy;

/// Rewrites a set of parallel copies into a sequence of scalar moves.
///
/// Implements Algorithm 1 of
///
/// > Boissinot, Darte, Rastello, Dupont de Dinechin, Guillon.
/// > Revisiting Out-of-SSA Translation for Correctness, Code Quality, and
/// > Efficiency. 2008.
///
/// The copy list is mutated in place; executing it top to bottom with
/// scalar moves afterwards has the same effect as reading all sources
/// before writing any destination. Cycles are broken through a single
/// spare register, requested lazily from `alloc_spare`.
pub fn sequentialize(
    copies: &mut Vec<RegisterCopy>,
    mut alloc_spare: impl FnMut() -> Register,
) {
    let mut ready: Vec<Register> = Vec::new();
    let mut todo: Vec<Register> = Vec::new();
    // Current location of each source value.
    let mut loc: HashMap<Register, Register> = HashMap::new();
    // The unique source copied into each destination.
    let mut pred: HashMap<Register, Register> = HashMap::new();
    let mut spare: Option<Register> = None;

    copies.retain(|copy| copy.src != copy.dst);
    if copies.is_empty() {
        return;
    }

    for &RegisterCopy { src, dst } in copies.iter() {
        loc.insert(src, src);
        pred.insert(dst, src);
        todo.push(dst);
    }

    // Destinations that are not themselves sources can be written
    // immediately.
    for &RegisterCopy { dst, .. } in copies.iter() {
        if !loc.contains_key(&dst) {
            ready.push(dst);
        }
    }

    copies.clear();
    while !todo.is_empty() {
        while let Some(b) = ready.pop() {
            let a = pred[&b];
            let c = loc[&a];
            copies.push(RegisterCopy { src: c, dst: b });

            loc.insert(a, b);
            if a == c && pred.contains_key(&a) {
                ready.push(a);
            }
        }

        let b = todo.pop().expect("todo is not empty");

        // The published algorithm tests `b == loc(pred(b))` here; that
        // condition is inverted. `b` still holding the value that some
        // pending copy needs means we are looking at a cycle, which is
        // broken by moving `b` aside into the spare register.
        if b != loc[&pred[&b]] {
            let spare = *spare.get_or_insert_with(&mut alloc_spare);
            copies.push(RegisterCopy { src: b, dst: spare });
            loc.insert(b, spare);
            ready.push(b);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;

    fn copy(src: u32, dst: u32) -> RegisterCopy {
        RegisterCopy {
            src: Register::new(src),
            dst: Register::new(dst),
        }
    }

    /// Executes the sequentialized moves over a simulated register file.
    /// Returns the number of spare registers requested.
    fn run(copies: &mut Vec<RegisterCopy>, file: &mut HashMap<u32, i64>, first_spare: u32) -> u32 {
        let mut spares = 0;
        sequentialize(copies, || {
            let reg = Register::new(first_spare + spares);
            spares += 1;
            reg
        });
        for copy in copies.iter() {
            let value = file
                .get(&copy.src.to_u32())
                .copied()
                .expect("source register holds a value");
            file.insert(copy.dst.to_u32(), value);
        }
        spares
    }

    #[test]
    fn trivial_copies_vanish() {
        let mut copies = vec![copy(0, 0), copy(1, 1)];
        sequentialize(&mut copies, || unreachable!("no spare needed"));
        assert!(copies.is_empty());
    }

    #[test]
    fn disjoint_copies_stay_plain() {
        // {B <- A, D <- C}
        let mut copies = vec![copy(0, 1), copy(2, 3)];
        let mut file = HashMap::from([(0, 10), (2, 30)]);
        let spares = run(&mut copies, &mut file, 100);

        assert_eq!(copies.len(), 2);
        assert_eq!(spares, 0);
        assert_eq!(file[&1], 10);
        assert_eq!(file[&3], 30);
    }

    #[test]
    fn three_cycle_uses_one_spare() {
        // {A <- B, B <- C, C <- A} with A=1, B=2, C=3.
        let (a, b, c) = (0, 1, 2);
        let mut copies = vec![copy(b, a), copy(c, b), copy(a, c)];
        let mut file = HashMap::from([(a, 1), (b, 2), (c, 3)]);
        let spares = run(&mut copies, &mut file, 100);

        assert!(spares <= 1);
        assert_eq!(file[&a], 2);
        assert_eq!(file[&b], 3);
        assert_eq!(file[&c], 1);
    }

    #[test]
    fn tree_hanging_off_a_cycle() {
        // {A <- B, X <- B, B <- C, C <- D, Y <- B, D <- A}
        // with A=1, B=2, C=3, D=4, X=-1, Y=-2.
        let (a, b, c, d, x, y) = (0, 1, 2, 3, 4, 5);
        let mut copies = vec![
            copy(b, a),
            copy(b, x),
            copy(c, b),
            copy(d, c),
            copy(b, y),
            copy(a, d),
        ];
        let mut file = HashMap::from([(a, 1), (b, 2), (c, 3), (d, 4), (x, -1), (y, -2)]);
        let spares = run(&mut copies, &mut file, 100);

        assert!(spares <= 1);
        assert_eq!(file[&a], 2);
        assert_eq!(file[&b], 3);
        assert_eq!(file[&c], 4);
        assert_eq!(file[&d], 1);
        assert_eq!(file[&x], 2);
        assert_eq!(file[&y], 2);
    }

    #[test]
    fn swap_pair() {
        let mut copies = vec![copy(0, 1), copy(1, 0)];
        let mut file = HashMap::from([(0, 5), (1, 6)]);
        let spares = run(&mut copies, &mut file, 100);

        assert_eq!(spares, 1);
        assert_eq!(file[&0], 6);
        assert_eq!(file[&1], 5);
    }

    proptest! {
        /// Random parallel copies with unique destinations behave like the
        /// parallel assignment they denote, with at most one spare.
        #[test]
        fn matches_parallel_semantics(
            pairs in proptest::collection::vec((0u32..12, 0u32..12), 1..12)
        ) {
            // Destinations must be unique for a well-formed parallel copy.
            let mut seen = std::collections::HashSet::new();
            let copies_in: Vec<RegisterCopy> = pairs
                .into_iter()
                .filter(|&(_, dst)| seen.insert(dst))
                .map(|(src, dst)| copy(src, dst))
                .collect();

            let mut file: HashMap<u32, i64> =
                (0u32..12).map(|r| (r, r as i64 + 100)).collect();
            let expected: HashMap<u32, i64> = {
                let mut state = file.clone();
                for c in &copies_in {
                    state.insert(c.dst.to_u32(), file[&c.src.to_u32()]);
                }
                state
            };

            let mut copies = copies_in;
            let spares = run(&mut copies, &mut file, 100);
            prop_assert!(spares <= 1);

            for reg in 0u32..12 {
                prop_assert_eq!(file[&reg], expected[&reg], "register {}", reg);
            }
        }
    }
}
