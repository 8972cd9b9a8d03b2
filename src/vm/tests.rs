use super::*;
use crate::asm::{assemble_bytes, parse_program};
use crate::resource::{ExtResult, MemResource};
use crate::state::FLAG_USERSTART;

struct Session {
    state: State,
    cache: Cache,
    render: RenderContext,
    resource: MemResource,
    ctx: SessionContext,
}

fn session() -> Session {
    let mut state = State::new(8, 8);
    state.set_cursor("root");
    Session {
        state,
        cache: Cache::new(1024),
        render: RenderContext::new(),
        resource: MemResource::new(),
        ctx: SessionContext::new("test"),
    }
}

fn run(source: &str, s: &mut Session, pos: usize) -> Result<RunSignal, EngineError> {
    let code = assemble_bytes(source).expect("assembly failed");
    let mut vm = Vm::new(
        &code,
        pos,
        &mut s.state,
        &mut s.cache,
        &mut s.render,
        &s.resource,
        &s.ctx,
    );
    vm.run()
}

// ==================== Decoding ====================

#[test]
fn decode_reverses_encode() {
    let source = "\
LOAD fetch_x 300
MAP fetch_x
MOUT yes \"Accept terms\"
MNEXT more \"Next page\"
HALT
INCMP yes accepted
CATCH on_err 4 1
CROAK fatal 3 1
MOVE next_menu
BACK
";
    let program = parse_program(source).unwrap();
    let code = assemble_bytes(source).unwrap();
    assert_eq!(decode_program(&code).unwrap(), program);
}

#[test]
fn decode_truncated_stream() {
    let mut code = assemble_bytes("MOVE next_menu\n").unwrap();
    code.truncate(5);
    assert!(matches!(
        decode_program(&code),
        Err(EngineError::Truncated { .. })
    ));
}

#[test]
fn decode_unknown_opcode() {
    assert!(matches!(
        decode_program(&[0xFF, 0xFF]),
        Err(EngineError::UnknownOpcode {
            opcode: 0xFFFF,
            offset: 0,
        })
    ));
}

#[test]
fn decode_bad_signal_byte() {
    // CATCH sym_a, size 1, then a signal byte of 0x02.
    let mut code = vec![0x00, 0x01, 0x05];
    code.extend_from_slice(b"sym_a");
    code.extend_from_slice(&[0x01, 0x01, 0x02]);
    assert!(matches!(
        decode_program(&code),
        Err(EngineError::BadBytecode { .. })
    ));
}

#[test]
fn decode_bad_size_width() {
    let mut code = vec![0x00, 0x03, 0x05];
    code.extend_from_slice(b"sym_a");
    code.push(0x05); // width 5
    assert!(matches!(
        decode_program(&code),
        Err(EngineError::BadBytecode { .. })
    ));
}

// ==================== Flow control ====================

#[test]
fn halt_waits_for_input() {
    let mut s = session();
    let signal = run("HALT\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
    assert!(s.state.test_flag(FLAG_READIN).unwrap());
}

#[test]
fn catch_jumps_when_flag_matches() {
    let mut s = session();
    s.state.set_flag_internal(FLAG_TERMINATE_BIT);
    let signal = run("CATCH sa 3 1\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("sa".to_string()));
    assert_eq!(s.state.cursor(), "sa");
    // A catch jump replaces the screen without pushing history.
    assert_eq!(s.state.depth(), 0);
}

const FLAG_TERMINATE_BIT: u32 = 3;

#[test]
fn catch_continues_when_flag_differs() {
    let mut s = session();
    let signal = run("CATCH sa 3 1\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
    assert_eq!(s.state.cursor(), "root");
}

#[test]
fn croak_aborts_when_flag_matches() {
    let mut s = session();
    s.state.set_flag(FLAG_USERSTART).unwrap();
    let signal = run(&format!("CROAK fatal {} 1\n", FLAG_USERSTART), &mut s, 0).unwrap();
    assert_eq!(
        signal,
        RunSignal::Terminal(TerminalKind::Croak {
            reason: "fatal".to_string(),
        })
    );
}

#[test]
fn croak_continues_when_flag_differs() {
    let mut s = session();
    let signal = run(&format!("CROAK fatal {} 1\nHALT\n", FLAG_USERSTART), &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
}

#[test]
fn move_pushes_exactly_one_frame() {
    let mut s = session();
    let depth = s.state.depth();
    let frames = s.cache.frame_count();

    let signal = run("MOVE next_menu\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("next_menu".to_string()));
    assert_eq!(s.state.cursor(), "next_menu");
    assert_eq!(s.state.depth(), depth + 1);
    assert_eq!(s.cache.frame_count(), frames + 1);
}

#[test]
fn back_pops_frame_and_cache() {
    let mut s = session();
    run("MOVE next_menu\n", &mut s, 0).unwrap();
    s.cache.add("scratch", vec![0; 10], 0).unwrap();
    let used_before = s.cache.used();

    let signal = run("BACK\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("root".to_string()));
    assert_eq!(s.state.cursor(), "root");
    assert_eq!(s.state.depth(), 0);
    assert!(s.cache.used() < used_before);
    assert_eq!(s.cache.get("scratch"), None);
}

#[test]
fn back_underflows_on_empty_stack() {
    let mut s = session();
    assert!(matches!(
        run("BACK\n", &mut s, 0),
        Err(EngineError::StackUnderflow)
    ));
}

#[test]
fn flag_partition_is_never_crossed_by_flow() {
    // A full run over every opcode that touches flags leaves the register's
    // reserved partition writable only through engine internals.
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, _| Ok(ExtResult::content(b"v".to_vec())));
    run("LOAD fetch_x 8\nHALT\n", &mut s, 0).unwrap();
    assert!(!s.state.test_flag(0).unwrap());
    assert!(!s.state.test_flag(2).unwrap());
}

// ==================== Input handling ====================

#[test]
fn incmp_without_input_waits_at_instruction() {
    let mut s = session();
    let code = assemble_bytes("INCMP yes accepted\n").unwrap();
    let mut vm = Vm::new(
        &code,
        0,
        &mut s.state,
        &mut s.cache,
        &mut s.render,
        &s.resource,
        &s.ctx,
    );
    assert_eq!(vm.run().unwrap(), RunSignal::WaitInput);
    // Resumption re-executes the comparison once input arrives.
    assert_eq!(vm.resume_pos(), 0);
}

#[test]
fn incmp_match_defers_until_blob_ends() {
    let mut s = session();
    s.state.set_input(b"yes");
    let signal = run("INCMP yes accepted\nINCMP no declined\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("accepted".to_string()));
    assert_eq!(s.state.cursor(), "accepted");
    assert_eq!(s.state.depth(), 1);
    // The match flag is consumed by the deferred move.
    assert!(!s.state.test_flag(FLAG_INMATCH).unwrap());
}

#[test]
fn incmp_first_match_wins() {
    let mut s = session();
    s.state.set_input(b"yes");
    let signal = run("INCMP yes first_t\nINCMP yes second_t\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("first_t".to_string()));
}

#[test]
fn incmp_no_match_waits_again() {
    let mut s = session();
    s.state.set_input(b"bogus");
    let signal = run("INCMP yes accepted\nINCMP no declined\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
    assert_eq!(s.state.cursor(), "root");
    assert_eq!(s.state.depth(), 0);
}

#[test]
fn incmp_back_sentinel_pops() {
    let mut s = session();
    run("MOVE about_us\n", &mut s, 0).unwrap();
    assert_eq!(s.state.depth(), 1);

    s.state.set_input(b"back");
    let signal = run("INCMP back __\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::Jump("root".to_string()));
    assert_eq!(s.state.depth(), 0);
}

#[test]
fn halt_checkpoint_skips_menu_on_resume() {
    let source = "MOUT yes \"Accept\"\nHALT\nINCMP yes accepted\n";
    let mut s = session();
    let code = assemble_bytes(source).unwrap();

    let resume = {
        let mut vm = Vm::new(
            &code,
            0,
            &mut s.state,
            &mut s.cache,
            &mut s.render,
            &s.resource,
            &s.ctx,
        );
        assert_eq!(vm.run().unwrap(), RunSignal::WaitInput);
        vm.resume_pos()
    };

    s.state.set_input(b"yes");
    let mut vm = Vm::new(
        &code,
        resume,
        &mut s.state,
        &mut s.cache,
        &mut s.render,
        &s.resource,
        &s.ctx,
    );
    assert_eq!(
        vm.run().unwrap(),
        RunSignal::Jump("accepted".to_string())
    );
    // The menu was built once; resumption did not re-run the MOUT.
    assert_eq!(
        crate::render::render("", &s.render, &s.cache, 0).unwrap(),
        "yes:Accept"
    );
}

// ==================== Externals and cache ====================

#[test]
fn load_caches_external_result() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, sym, _| Ok(ExtResult::content(sym.as_bytes().to_vec())));
    run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(s.cache.get("fetch_x"), Some(&b"fetch_x"[..]));
    assert!(!s.state.test_flag(FLAG_LOADFAIL).unwrap());
}

#[test]
fn load_receives_pending_input() {
    let mut s = session();
    s.resource.add_func("fetch_x", |_, _, input| {
        Ok(ExtResult::content([&b"in:"[..], input].concat()))
    });
    s.state.set_input(b"42");
    run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(s.cache.get("fetch_x"), Some(&b"in:42"[..]));
}

#[test]
fn load_failure_sets_flag_and_continues() {
    let mut s = session();
    s.resource.add_func("fetch_x", |_, _, _| {
        Err(EngineError::External {
            name: "fetch_x".to_string(),
            message: "boom".to_string(),
        })
    });
    let signal = run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
    assert!(s.state.test_flag(FLAG_LOADFAIL).unwrap());
    assert_eq!(s.cache.get("fetch_x"), None);
}

#[test]
fn load_unknown_external_is_nonfatal() {
    let mut s = session();
    let signal = run("LOAD nothere 8\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(signal, RunSignal::WaitInput);
    assert!(s.state.test_flag(FLAG_LOADFAIL).unwrap());
}

#[test]
fn load_success_clears_failure_flag() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, _| Ok(ExtResult::content(b"ok".to_vec())));
    s.state.set_flag_internal(FLAG_LOADFAIL);
    run("LOAD fetch_x 8\nHALT\n", &mut s, 0).unwrap();
    assert!(!s.state.test_flag(FLAG_LOADFAIL).unwrap());
}

#[test]
fn load_applies_user_flag_deltas() {
    let mut s = session();
    s.resource.add_func("fetch_x", |_, _, _| {
        Ok(ExtResult {
            content: b"x".to_vec(),
            flags_set: vec![FLAG_USERSTART + 2],
            flags_reset: vec![FLAG_USERSTART + 3],
        })
    });
    s.state.set_flag(FLAG_USERSTART + 3).unwrap();
    run("LOAD fetch_x 8\nHALT\n", &mut s, 0).unwrap();
    assert!(s.state.test_flag(FLAG_USERSTART + 2).unwrap());
    assert!(!s.state.test_flag(FLAG_USERSTART + 3).unwrap());
}

#[test]
fn load_rejects_reserved_flag_delta() {
    let mut s = session();
    s.resource.add_func("fetch_x", |_, _, _| {
        Ok(ExtResult {
            content: b"x".to_vec(),
            flags_set: vec![1],
            flags_reset: vec![],
        })
    });
    assert!(matches!(
        run("LOAD fetch_x 8\n", &mut s, 0),
        Err(EngineError::ReservedFlag { bit: 1 })
    ));
}

#[test]
fn load_result_over_declared_size_fails() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, _| Ok(ExtResult::content(vec![0; 64])));
    assert!(matches!(
        run("LOAD fetch_x 8\n", &mut s, 0),
        Err(EngineError::CacheValueTooLarge { len: 64, max: 8, .. })
    ));
}

#[test]
fn load_skips_when_already_cached() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, input| Ok(ExtResult::content(input.to_vec())));
    s.state.set_input(b"first");
    run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();

    // Replaying the same screen leaves the cached value alone.
    s.state.set_input(b"second");
    run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(s.cache.get("fetch_x"), Some(&b"first"[..]));
}

#[test]
fn reload_overwrites_cached_value() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, input| Ok(ExtResult::content(input.to_vec())));
    s.state.set_input(b"first");
    run("LOAD fetch_x 32\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(s.cache.get("fetch_x"), Some(&b"first"[..]));

    s.state.set_input(b"second");
    run("RELOAD fetch_x\nHALT\n", &mut s, 0).unwrap();
    assert_eq!(s.cache.get("fetch_x"), Some(&b"second"[..]));
}

#[test]
fn reload_without_prior_load_fails() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, _| Ok(ExtResult::content(b"x".to_vec())));
    assert!(matches!(
        run("RELOAD fetch_x\n", &mut s, 0),
        Err(EngineError::CacheMiss { .. })
    ));
}

#[test]
fn map_requires_cached_value() {
    let mut s = session();
    assert!(matches!(
        run("MAP fetch_x\n", &mut s, 0),
        Err(EngineError::CacheMiss { .. })
    ));
}

#[test]
fn map_exposes_value_to_renderer() {
    let mut s = session();
    s.resource
        .add_func("fetch_x", |_, _, _| Ok(ExtResult::content(b"hello".to_vec())));
    run("LOAD fetch_x 32\nMAP fetch_x\nHALT\n", &mut s, 0).unwrap();
    let out = crate::render::render("got {{fetch_x}}", &s.render, &s.cache, 0).unwrap();
    assert_eq!(out, "got hello");
}

// ==================== Menus ====================

#[test]
fn menu_instructions_collect_entries() {
    let mut s = session();
    let source = "MOUT yes \"Accept\"\nMOUT no \"Decline\"\nMPREV pg \"Back\"\nMNEXT nx \"More\"\nHALT\n";
    run(source, &mut s, 0).unwrap();
    let out = crate::render::render("", &s.render, &s.cache, 0).unwrap();
    assert_eq!(out, "yes:Accept\nno:Decline\npg:Back\nnx:More");
}

// ==================== Runtime faults ====================

#[test]
fn step_truncated_stream_is_fatal() {
    let mut s = session();
    let mut code = assemble_bytes("MOVE next_menu\n").unwrap();
    code.truncate(6);
    let mut vm = Vm::new(
        &code,
        0,
        &mut s.state,
        &mut s.cache,
        &mut s.render,
        &s.resource,
        &s.ctx,
    );
    assert!(matches!(vm.run(), Err(EngineError::Truncated { .. })));
}

#[test]
fn step_unknown_opcode_is_fatal() {
    let mut s = session();
    let code = [0x00, 0x63];
    let mut vm = Vm::new(
        &code,
        0,
        &mut s.state,
        &mut s.cache,
        &mut s.render,
        &s.resource,
        &s.ctx,
    );
    assert!(matches!(
        vm.run(),
        Err(EngineError::UnknownOpcode { opcode: 0x63, .. })
    ));
}

#[test]
fn catch_on_out_of_range_bit_is_fatal() {
    let mut s = session();
    assert!(matches!(
        run("CATCH sa 250 1\n", &mut s, 0),
        Err(EngineError::FlagOutOfRange { bit: 250, .. })
    ));
}

#[test]
fn move_beyond_stack_bound_is_fatal() {
    let mut s = session();
    for _ in 0..8 {
        run("MOVE next_menu\n", &mut s, 0).unwrap();
    }
    assert!(matches!(
        run("MOVE next_menu\n", &mut s, 0),
        Err(EngineError::StackOverflow { depth: 8 })
    ));
}
