//! Per-signal scoring latency through the engine (sub-500 ms target per signal).

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shieldline_agent::config::ShieldConfig;
use shieldline_agent::signal::{Action, ActionKind, Signal};
use shieldline_agent::ThreatEngine;

const DROPPER: &str = r#"var f = new Function(atob('d2luZG93LmxvY2F0aW9u'));
eval(String.fromCharCode(97,108,101,114,116));
var sh = new ActiveXObject("WScript.Shell"); sh.Run("cmd.exe /c whoami");"#;

fn bench_phishing(c: &mut Criterion) {
    let engine = ThreatEngine::new(&ShieldConfig::default()).unwrap();
    c.bench_function("phishing_lookalike_url", |b| {
        b.iter(|| {
            black_box(engine.detect_phishing(
                black_box("https://paypa1.com/login"),
                black_box("Please verify your account"),
            ))
        })
    });
    c.bench_function("phishing_clean_url", |b| {
        b.iter(|| black_box(engine.detect_phishing(black_box("https://www.google.com"), "")))
    });
}

fn bench_malware(c: &mut Criterion) {
    let engine = ThreatEngine::new(&ShieldConfig::default()).unwrap();
    let large = "function add(a, b) { return a + b; }\n".repeat(2_000);
    c.bench_function("malware_dropper_script", |b| {
        b.iter(|| black_box(engine.detect_malware(black_box(DROPPER), "script")))
    });
    c.bench_function("malware_large_benign_script", |b| {
        b.iter(|| black_box(engine.detect_malware(black_box(&large), "script")))
    });
}

fn bench_behavior(c: &mut Criterion) {
    let engine = ThreatEngine::new(&ShieldConfig::default()).unwrap();
    let action = Action::new(ActionKind::Process)
        .with_detail("process_name", "cmd.exe")
        .with_detail("action", "hidden_process")
        .with_detail("hidden", true);
    c.bench_function("behavior_full_window", |b| {
        b.iter(|| black_box(engine.analyze_behavior(black_box(&action))))
    });
}

fn bench_unified(c: &mut Criterion) {
    let engine = ThreatEngine::new(&ShieldConfig::default()).unwrap();
    let signals = [
        Signal::url("https://bank-verify.com/update", "verify your account immediately"),
        Signal::code(DROPPER, "script"),
        Signal::Action(Action::new(ActionKind::Registry).with_detail("key_path", "HKLM\\Run")),
    ];
    c.bench_function("unified_mixed_signals", |b| {
        b.iter(|| {
            for s in &signals {
                black_box(engine.unified_detect(s));
            }
        })
    });
}

criterion_group!(benches, bench_phishing, bench_malware, bench_behavior, bench_unified);
criterion_main!(benches);
