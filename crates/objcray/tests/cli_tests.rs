//! CLI integration tests for objcray.
//!
//! Each test writes a synthetic image to a temporary directory and runs
//! the built binary against it.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use objcray_formats::macho::builder::{self, ChainedFixupsBuilder, MachOBuilder};
use objcray_formats::macho::{CPU_TYPE_ARM64, VM_PROT_READ, VM_PROT_WRITE};
use objcray_formats::{Bitness, PointerFormat};
use tempfile::TempDir;

const BASE: u64 = 0x1_0000_0000;
const DATA: u64 = BASE + 0x4000;

/// Get the path to the objcray binary.
fn objcray_bin() -> String {
    env!("CARGO_BIN_EXE_objcray").to_string()
}

/// Run objcray with the given arguments.
fn run_objcray(args: &[&str]) -> Output {
    Command::new(objcray_bin())
        .args(args)
        .output()
        .expect("Failed to execute objcray")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// One class `Widget : NSObject` with an `int _count` ivar at offset 8.
fn widget_image() -> Vec<u8> {
    let mut b = MachOBuilder::new(Bitness::Bits64, CPU_TYPE_ARM64);
    b.add_segment("__TEXT", BASE, 0x4000, 0, 0x4000, VM_PROT_READ);
    let data = b.add_segment("__DATA", DATA, 0x4000, 0x4000, 0x4000, VM_PROT_READ | VM_PROT_WRITE);
    b.add_segment("__LINKEDIT", BASE + 0x8000, 0x1000, 0x8000, 0x1000, VM_PROT_READ);
    b.add_section(data, "__objc_classlist", DATA, 8);
    b.add_section(data, "__objc_imageinfo", DATA + 8, 8);
    b.add_dylib("/System/Library/Frameworks/Foundation.framework/Foundation");

    b.write_bytes(0x2000, b"Widget\0");
    b.write_bytes(0x2010, b"_count\0");
    b.write_bytes(0x2020, b"i\0");

    let mut fixups = ChainedFixupsBuilder::new(PointerFormat::Ptr64, 3);
    let nsobject = fixups.import("_OBJC_CLASS_$_NSObject", 1, false);

    // (slot, rebase target or bind)
    let slots: [(u64, Option<u64>); 7] = [
        (DATA, Some(DATA + 0x100)),
        (DATA + 0x108, None),
        (DATA + 0x120, Some(DATA + 0x200)),
        (DATA + 0x218, Some(BASE + 0x2000)),
        (DATA + 0x230, Some(DATA + 0x300)),
        (DATA + 0x308, Some(DATA + 0x400)),
        (DATA + 0x310, Some(BASE + 0x2010)),
    ];
    let type_slot = DATA + 0x318;
    for (i, (slot, target)) in slots.iter().enumerate() {
        let next_slot = slots.get(i + 1).map_or(type_slot, |(s, _)| *s);
        let next = (next_slot - slot) / 4;
        let raw = match target {
            Some(target) => builder::ptr64_rebase(*target, next),
            None => builder::ptr64_bind(nsobject, 0, next),
        };
        b.write_u64(slot - BASE, raw);
    }
    b.write_u64(type_slot - BASE, builder::ptr64_rebase(BASE + 0x2020, 0));
    fixups.segment(1, 0x4000, &[0]);

    // class_ro_t sizes, ivar list header and entry tail, ivar offset
    b.write_u32(0x4204, 8);
    b.write_u32(0x4208, 12);
    b.write_u32(0x4300, 32);
    b.write_u32(0x4304, 1);
    b.write_u32(0x4320, 2);
    b.write_u32(0x4324, 4);
    b.write_u32(0x4400, 8);

    b.add_chained_fixups(0x8000, &fixups.build());
    b.build()
}

fn write_image(dir: &TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).expect("Failed to write image");
    path
}

fn widget_path(dir: &TempDir) -> PathBuf {
    write_image(dir, "Widget", &widget_image())
}

fn arg(path: &Path) -> &str {
    path.to_str().expect("temp path is UTF-8")
}

// =============================================================================
// Basic Command Tests
// =============================================================================

#[test]
fn test_help() {
    let output = run_objcray(&["--help"]);
    assert!(output.status.success());
    let out = stdout(&output);
    assert!(out.contains("Objective-C"));
    assert!(out.contains("--slide"));
}

#[test]
fn test_missing_binary_argument() {
    let output = run_objcray(&[]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("No binary given"));
}

#[test]
fn test_unreadable_file() {
    let output = run_objcray(&["/nonexistent/objcray-test-binary"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to read binary"));
}

#[test]
fn test_not_a_macho() {
    let dir = TempDir::new().unwrap();
    let path = write_image(&dir, "text.txt", b"just some text, not a binary");
    let output = run_objcray(&[arg(&path)]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("not a Mach-O"));
}

// =============================================================================
// Extraction Commands
// =============================================================================

#[test]
fn test_classes_text() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path)]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Widget : NSObject (Foundation)"), "{}", out);
    assert!(out.contains("+8  int _count"), "{}", out);
    assert!(out.contains("1 classes"));
}

#[test]
fn test_classes_json() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "--json", "classes"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));

    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let class = &json[0];
    assert_eq!(class["name"], "Widget");
    assert_eq!(class["address"], DATA + 0x100);
    assert_eq!(class["superclass"]["kind"], "external");
    assert_eq!(class["superclass"]["name"], "NSObject");
    assert_eq!(class["ivars"][0]["name"], "_count");
    assert_eq!(class["ivars"][0]["offset"], 8);
    assert_eq!(class["ivars"][0]["type"]["primitive"], "int");
    assert_eq!(class["partial"], false);
}

#[test]
fn test_slide_applies_to_addresses() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "--slide", "0x1000", "--json", "classes"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json[0]["address"], DATA + 0x100 + 0x1000);
}

#[test]
fn test_raw_types() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "--raw-types", "--json", "classes"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(json[0]["ivars"][0]["type"].is_null());
    assert_eq!(json[0]["ivars"][0]["type_encoding"], "i");
}

#[test]
fn test_empty_lists() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    for (command, summary) in [
        ("protocols", "0 protocols"),
        ("categories", "0 categories"),
        ("warnings", "0 warnings"),
    ] {
        let output = run_objcray(&[arg(&path), command]);
        assert!(output.status.success(), "{}: {}", command, stderr(&output));
        assert!(stdout(&output).contains(summary), "{}", command);
    }
}

#[test]
fn test_info() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "info"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("Architecture:  arm64"), "{}", out);
    assert!(out.contains("8 chained entries"), "{}", out);
    assert!(out.contains("Classes:       1"), "{}", out);
    assert!(out.contains("Foundation.framework"));
}

#[test]
fn test_fixups_binds_only() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "fixups", "--binds"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("_OBJC_CLASS_$_NSObject"));
    assert!(out.contains("1 entries"));
}

#[test]
fn test_fixups_json_slide() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "--slide", "0x4000", "--json", "fixups"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    let first = &json[0];
    assert_eq!(first["file_offset"], 0x4000);
    assert_eq!(first["address"], DATA + 0x4000);
    assert_eq!(first["resolved"]["Rebase"], DATA + 0x100 + 0x4000);
}

#[test]
fn test_wrong_arch() {
    let dir = TempDir::new().unwrap();
    let path = widget_path(&dir);
    let output = run_objcray(&[arg(&path), "--arch", "x86_64"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to parse Mach-O"));

    let output = run_objcray(&[arg(&path), "--arch", "pdp11"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Unknown architecture"));
}

// =============================================================================
// Decode Command
// =============================================================================

#[test]
fn test_decode_type() {
    let output = run_objcray(&["decode", "{CGPoint=dd}"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("struct CGPoint"));
    assert!(out.contains("encoding: {CGPoint=dd}"));
}

#[test]
fn test_decode_type_json() {
    let output = run_objcray(&["decode", "^{CGPoint=dd}", "--json"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let json: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(json["pointer"]["struct"]["name"], "CGPoint");
}

#[test]
fn test_decode_method() {
    let output = run_objcray(&["decode", "--method", "v24@0:8@16"]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("returns:    void"));
    assert!(out.contains("frame size: 24"));
}

#[test]
fn test_decode_property() {
    let output = run_objcray(&["decode", "--property", r#"T@"NSString",C,N,V_name"#]);
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("NSString *"));
    assert!(out.contains("nonatomic, copy"));
    assert!(out.contains("ivar:       _name"));
}

#[test]
fn test_decode_error() {
    let output = run_objcray(&["decode", "{Foo=i"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to decode"));
}
