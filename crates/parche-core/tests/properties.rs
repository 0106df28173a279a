//! Property-based invariants for the engine.

use proptest::prelude::*;

use parche_core::{Engine, EngineConfig, EngineError};

fn engine_with_block(block_size: usize) -> Engine {
    let mut engine = Engine::new();
    engine
        .init(EngineConfig {
            block_size,
            ..EngineConfig::default()
        })
        .unwrap();
    engine
}

fn advance(engine: &Engine, blocks: usize) {
    let config = engine.config().unwrap();
    let mut out = vec![0.0; config.block_size * config.output_channels];
    for _ in 0..blocks {
        engine.process_block(&[], &mut out).unwrap();
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Logical time after K blocks of size N is exactly K*N samples,
    /// regardless of block size.
    #[test]
    fn logical_time_is_exact(
        block_size in 1usize..512,
        blocks in 0usize..64,
    ) {
        let engine = engine_with_block(block_size);
        engine.dsp(true).unwrap();
        advance(&engine, blocks);
        prop_assert_eq!(
            engine.logical_time().unwrap(),
            (blocks * block_size) as u64
        );
    }

    /// The delivered flag tracks receiver existence: false with no
    /// endpoint, true once a receive object is open, false again after
    /// its patch closes.
    #[test]
    fn delivered_tracks_receiver_lifecycle(name in "[a-z]{1,12}", value in any::<f32>()) {
        let engine = engine_with_block(64);
        prop_assert!(!engine.send_float(&name, value).unwrap());

        let id = engine.load_str(&format!("object 1 receive {name}")).unwrap();
        prop_assert!(engine.send_float(&name, value).unwrap());

        engine.close(id).unwrap();
        prop_assert!(!engine.send_float(&name, value).unwrap());
    }

    /// In-bounds array writes round-trip exactly; every access crossing
    /// the declared size fails with OutOfRange and changes nothing.
    #[test]
    fn array_accesses_respect_bounds(
        size in 1usize..256,
        offset in 0usize..512,
        data in prop::collection::vec(any::<f32>(), 1..64),
    ) {
        let engine = engine_with_block(64);
        engine.load_str(&format!("array t {size}")).unwrap();

        let in_bounds = offset + data.len() <= size;
        let write = engine.array_write("t", offset, &data);
        if in_bounds {
            write.unwrap();
            let mut back = vec![0.0; data.len()];
            engine.array_read("t", offset, &mut back).unwrap();
            for (a, b) in back.iter().zip(&data) {
                prop_assert!(a == b || (a.is_nan() && b.is_nan()));
            }
        } else {
            prop_assert!(
                matches!(write, Err(EngineError::OutOfRange { .. })),
                "expected OutOfRange, got {:?}",
                write
            );
            let mut whole = vec![1.0; size];
            engine.array_read("t", 0, &mut whole).unwrap();
            prop_assert!(whole.iter().all(|&s| s == 0.0));
        }
    }

    /// A constant signal through a gain renders value * coeff on every
    /// output sample; exact silence stays exactly zero.
    #[test]
    fn gain_is_exact_multiplication(
        value in -1000.0f32..1000.0,
        coeff in -1000.0f32..1000.0,
    ) {
        let engine = engine_with_block(32);
        engine
            .load_str(&format!(
                "object 1 sig~ {value}\nobject 2 *~ {coeff}\nobject 3 dac~\n\
                 connect 1 0 2 0\nconnect 2 0 3 0"
            ))
            .unwrap();
        engine.dsp(true).unwrap();

        let mut out = vec![0.0; 32 * 2];
        engine.process_block(&[], &mut out).unwrap();
        for frame in out.chunks(2) {
            prop_assert_eq!(frame[0], value * coeff);
            prop_assert_eq!(frame[1], 0.0);
        }
    }

    /// Every queued send survives or fails atomically: after filling the
    /// inbound queue to capacity, exactly `capacity` messages come out the
    /// far side in order.
    #[test]
    fn inbound_queue_is_exact_under_overflow(
        capacity in 1usize..32,
        attempts in 1usize..64,
    ) {
        let mut engine = Engine::new();
        engine
            .init(EngineConfig {
                block_size: 64,
                queue_capacity: capacity,
                ..EngineConfig::default()
            })
            .unwrap();
        engine.load_str("object 1 receive n\nobject 2 print p\nconnect 1 0 2 0").unwrap();
        engine.dsp(true).unwrap();

        let mut accepted = 0usize;
        for i in 0..attempts {
            match engine.send_float("n", i as f32) {
                Ok(true) => accepted += 1,
                Err(EngineError::QueueFull) => {}
                other => prop_assert!(false, "unexpected result {other:?}"),
            }
        }
        prop_assert_eq!(accepted, attempts.min(capacity));

        advance(&engine, 1);

        #[derive(Default)]
        struct Prints(Vec<String>);
        impl parche_core::MessageSink for Prints {
            fn print(&mut self, line: &str) {
                self.0.push(line.to_owned());
            }
        }
        let mut sink = Prints::default();
        engine.dispatch_pending(&mut sink);
        let expected: Vec<String> = (0..accepted.min(capacity))
            .map(|i| format!("p: {}", i as f32))
            .collect();
        prop_assert_eq!(sink.0, expected);
    }

    /// Parsing never panics on arbitrary input; it either opens a patch or
    /// reports InvalidPatch.
    #[test]
    fn parser_is_total(source in "[ -~\n]{0,256}") {
        let engine = engine_with_block(64);
        match engine.load_str(&source) {
            Ok(id) => engine.close(id).unwrap(),
            Err(EngineError::InvalidPatch { line, .. }) => {
                prop_assert!(line >= 1);
            }
            Err(EngineError::CyclicGraph { .. }) => {}
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }
}
