//! Lang tester harness for location assignment tests.

use lang_tester::LangTester;
use regex::Regex;
use std::{fs::read_to_string, process::Command};

const COMMENT: &str = ";";

/// Tests whose file name starts with this prefix are run against a register file with floating
/// point registers.
const FLOAT_PREFIX: &str = "float_";

fn main() {
    println!("Running location assignment tests...");

    LangTester::new()
        .test_dir("regalloc")
        .test_path_filter(|p| p.extension().and_then(|p| p.to_str()) == Some("trace"))
        .test_extract(move |p| {
            read_to_string(p)
                .unwrap()
                .lines()
                .skip_while(|l| !l.starts_with(COMMENT))
                .take_while(|l| l.starts_with(COMMENT))
                .map(|l| &l[COMMENT.len()..])
                .collect::<Vec<_>>()
                .join("\n")
        })
        .test_cmds(move |p| {
            let mut dumper = Command::new(env!("CARGO_BIN_EXE_dump_regalloc"));
            if p.file_name()
                .and_then(|x| x.to_str())
                .is_some_and(|x| x.starts_with(FLOAT_PREFIX))
            {
                dumper.args(["-r", "x86_32"]);
            }
            dumper.arg(p);
            vec![("Dump", dumper)]
        })
        .fm_options(|_, _, fmb| {
            // Use `{{}}` to match non-literal strings in tests.
            // E.g. use `{{r}}` to capture the name of a register.
            let ptn_re_ignore = Regex::new(r"\{\{_}\}").unwrap();
            let ptn_re = Regex::new(r"\{\{.+?\}\}").unwrap();
            let text_re = Regex::new(r"[a-zA-Z0-9\._]+").unwrap();
            fmb.name_matcher_ignore(ptn_re_ignore, text_re.clone())
                .name_matcher(ptn_re, text_re)
        })
        .run();
}
