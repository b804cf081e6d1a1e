// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![no_main]

use city::expr::{compile_expression, run_expression, Coerce};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, rest)) = data.split_first() else {
        return;
    };

    // Raw bytes as a program
    let _ = run_expression(rest, rest);

    // Text as an expression with no members in scope
    if let Ok(source) = std::str::from_utf8(rest) {
        let coerce = match selector % 3 {
            0 => Coerce::None,
            1 => Coerce::Int,
            _ => Coerce::Truth,
        };
        if let Ok(program) = compile_expression(source, &(), coerce) {
            let _ = run_expression(&program, &[]);
        }
    }
});
