//! Integration tests for the runtime
//!
//! These tests verify cross-module interactions: capsules exchanging
//! encoded messages, syscalls driving sandboxed subprocesses with a shared
//! audit trail, and extracted assembly blocks flowing into the native
//! bridge.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use trion_runtime::channel::{Channel, Recv};
use trion_runtime::capsule::{Capsule, CapsuleContext};
use trion_runtime::memory::Quarantine;
use trion_runtime::{dodecagram, nasm, syscall, RuntimeError};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_capsule_pipeline_with_encoded_messages() {
    init_logging();
    // Producer encodes values to base-12 text, consumer decodes and sums
    // them into its private quarantine.
    let results = Arc::new(Channel::<u64>::new(8).unwrap());

    let consumer = {
        let results = Arc::clone(&results);
        Capsule::new("summer", move |ctx: &CapsuleContext<String>| {
            let mut total = 0u64;
            loop {
                match ctx.recv() {
                    Ok(Recv::Item(text)) => {
                        total += dodecagram::decode_u64(&text).unwrap();
                        // scratch copy lives in the capsule's own arena
                        let id = ctx.quarantine().store_str(&text).unwrap();
                        ctx.quarantine().free(id).unwrap();
                    }
                    _ => break,
                }
            }
            results.send(total).unwrap();
        })
        .unwrap()
    };
    consumer.start().unwrap();

    let producer = {
        let inbox = Arc::new(consumer);
        let handle = {
            let inbox = Arc::clone(&inbox);
            std::thread::spawn(move || {
                for n in [12u64, 144, 1, 23] {
                    inbox.send(dodecagram::encode_u64(n)).unwrap();
                }
            })
        };
        handle.join().unwrap();
        inbox
    };
    producer.shutdown().unwrap();

    match results.recv_timeout(Duration::from_secs(2)).unwrap() {
        Recv::Item(total) => assert_eq!(total, 12 + 144 + 1 + 23),
        Recv::Done => panic!("consumer never reported"),
    }
}

#[test]
fn test_quarantine_shared_across_worker_threads() {
    init_logging();
    let arena = Arc::new(Quarantine::with_capacity(8).unwrap());
    let ids = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..4)
        .map(|n| {
            let arena = Arc::clone(&arena);
            let ids = Arc::clone(&ids);
            std::thread::spawn(move || {
                for i in 0..8 {
                    let id = arena.alloc(16).unwrap();
                    arena.write(id, 0, &[n as u8, i as u8]).unwrap();
                    ids.lock().unwrap().push(id);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }

    assert_eq!(arena.len(), 32);
    for id in ids.lock().unwrap().iter() {
        assert_eq!(arena.size_of(*id).unwrap(), 16);
    }
    arena.seal();
    assert!(matches!(arena.alloc(4), Err(RuntimeError::Sealed)));
}

#[test]
fn test_syscall_round_trip_through_encoder() {
    init_logging();
    // A syscall that answers in base-12, exercised through the process-wide
    // registry the way an embedding front end would.
    syscall::register(
        syscall::SyscallDef::new("int.encode12", |args| {
            let n: u64 = args
                .and_then(|a| a.parse().ok())
                .ok_or_else(|| RuntimeError::InvalidArgument("expected an integer".into()))?;
            Ok(Some(dodecagram::encode_u64(n)))
        })
        .description("encode a decimal integer as base-12 text"),
    )
    .unwrap();

    let out = syscall::invoke("int.encode12", Some("20"), None).unwrap();
    assert_eq!(out.as_deref(), Some("18"));
    assert!(matches!(
        syscall::invoke("int.encode12", Some("not a number"), None),
        Err(RuntimeError::InvalidArgument(_))
    ));
    syscall::unregister("int.encode12").unwrap();
}

#[cfg(unix)]
#[test]
fn test_syscall_launches_sandboxed_subprocess() {
    init_logging();
    use trion_runtime::sandbox::{self, SandboxRequest, SandboxStatus};

    syscall::register(
        syscall::SyscallDef::new("host.run", |args| {
            let path = args.ok_or_else(|| {
                RuntimeError::InvalidArgument("host.run: missing program path".into())
            })?;
            let result = sandbox::run(
                &SandboxRequest::new(path).time_limit(Duration::from_secs(5)),
            )?;
            Ok(Some(serde_json::to_string(&result.status).unwrap()))
        })
        .auth_token("integration-token"),
    )
    .unwrap();

    // Missing token is rejected before anything runs.
    assert!(matches!(
        syscall::invoke("host.run", Some("/bin/true"), None),
        Err(RuntimeError::Unauthorized(_))
    ));

    let out = syscall::invoke("host.run", Some("/bin/true"), Some("integration-token")).unwrap();
    let status: SandboxStatus = serde_json::from_str(out.as_deref().unwrap()).unwrap();
    assert_eq!(status, SandboxStatus::Exited(0));
    syscall::unregister("host.run").unwrap();
}

#[test]
fn test_extracted_block_feeds_native_bridge() {
    init_logging();
    use trion_runtime::nasm::NativeLoader;

    let source = "\
print \"before\"
--nasm-start name=add abi=sysv
    .globl trion_add
    trion_add:
        lea (%rdi, %rsi), %rax
        ret
--nasm-end
print \"after\"
";
    let blocks = nasm::extract_blocks(source).unwrap();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].meta_value("name"), Some("add"));
    assert!(blocks[0].content.starts_with(".globl trion_add"));

    // Assembling needs a host toolchain; degrade to a skip when none is
    // installed rather than failing the suite.
    if !cfg!(all(target_os = "linux", target_arch = "x86_64")) {
        return;
    }
    let bridge = nasm::NasmBridge::new();
    match bridge.compile_and_load(&blocks[0].content, "trion_add") {
        Ok((_module, entry)) => {
            let add: unsafe extern "C" fn(u64, u64) -> u64 = unsafe { entry.cast() };
            assert_eq!(unsafe { add(40, 2) }, 42);
        }
        Err(RuntimeError::Toolchain(diag)) => {
            println!("no usable toolchain, skipping: {}", diag);
        }
        Err(other) => panic!("unexpected failure: {:?}", other),
    }
}

#[test]
fn test_channel_backpressure_between_threads() {
    init_logging();
    let chan = Arc::new(Channel::<Vec<u8>>::new(2).unwrap());

    let producer = {
        let chan = Arc::clone(&chan);
        std::thread::spawn(move || {
            for n in 0u8..20 {
                chan.send(vec![n; 4]).unwrap();
            }
            chan.close();
        })
    };

    let mut seen = Vec::new();
    loop {
        match chan.recv().unwrap() {
            Recv::Item(v) => seen.push(v[0]),
            Recv::Done => break,
        }
    }
    producer.join().unwrap();
    assert_eq!(seen, (0u8..20).collect::<Vec<_>>());
}
