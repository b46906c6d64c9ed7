//! Throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use meterpoll_core::{
    decode_float32, Connection, Decoder, ModbusTransport, ReadingResult, RegisterMap, ResultSink, RetryPolicy,
    TransportError,
};

struct Loopback;

impl ModbusTransport for Loopback {
    fn read_input_registers(&mut self, address: u16, _count: u16, _unit_id: u8) -> Result<Vec<u16>, TransportError> {
        Ok(vec![0x4248, address])
    }

    fn read_holding_registers(&mut self, address: u16, _count: u16, _unit_id: u8) -> Result<Vec<u16>, TransportError> {
        Ok(vec![0x4248, address])
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn connection_info(&self) -> String {
        "loopback".to_string()
    }
}

fn decode_benchmark(c: &mut Criterion) {
    let words: Vec<[u16; 2]> = (0..1024u16).map(|i| [0x4248, i]).collect();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(words.len() as u64));

    group.bench_function("float32_big_endian", |b| {
        b.iter(|| {
            for w in &words {
                black_box(decode_float32(black_box(w), false).ok());
            }
        })
    });

    group.bench_function("float32_word_swap", |b| {
        b.iter(|| {
            for w in &words {
                black_box(decode_float32(black_box(w), true).ok());
            }
        })
    });

    group.finish();
}

fn sweep_benchmark(c: &mut Criterion) {
    let map = RegisterMap::em6400ng();
    let sink = ResultSink::new(map.clone());
    let decoder = Decoder::new(false);
    let mut connection = Connection::from_transport(Box::new(Loopback), RetryPolicy::none(), "loopback".into());

    let mut group = c.benchmark_group("sweep");
    group.throughput(Throughput::Elements(map.len() as u64));

    let mut cycle = 0u64;
    group.bench_function("em6400ng_map", |b| {
        b.iter(|| {
            cycle += 1;
            for (index, def) in map.iter().enumerate() {
                let result = match connection.read_registers(def.address(), def.word_count(), def.function, 1) {
                    Ok(words) => match decoder.decode(def, &words) {
                        Ok(value) => ReadingResult::ok(cycle, index, words, value),
                        Err(e) => ReadingResult::decode_error(cycle, index, words, e.to_string()),
                    },
                    Err(e) => ReadingResult::transport_error(cycle, index, e.to_string()),
                };
                sink.publish(index, result);
            }
            black_box(sink.snapshot())
        })
    });

    group.finish();
}

criterion_group!(benches, decode_benchmark, sweep_benchmark);
criterion_main!(benches);
