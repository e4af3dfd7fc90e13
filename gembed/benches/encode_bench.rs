use criterion::{black_box, criterion_group, criterion_main, Criterion};
use gembed::{BatchView, Malloc, OutputBatch, SliceArray};

fn bench_encode(c: &mut Criterion) {
    let texts: Vec<String> = (0..64)
        .map(|i| format!("sentence number {i} with a little padding to look like real input"))
        .collect();

    c.bench_function("slice_encode_64", |b| {
        b.iter(|| {
            let arr = SliceArray::encode(&Malloc, black_box(&texts)).unwrap();
            black_box(arr.as_ptr());
        });
    });
}

fn bench_read_all(c: &mut Criterion) {
    let (n, dim) = (64usize, 384usize);
    let mut data: Vec<f32> = (0..n * dim).map(|i| (i % 97) as f32 * 0.01).collect();
    let view = BatchView::from_raw(OutputBatch {
        data: data.as_mut_ptr(),
        n_vectors: n,
        dim,
    })
    .unwrap();

    c.bench_function("batch_read_all_64x384", |b| {
        b.iter(|| {
            let rows = unsafe { view.read_all() };
            black_box(rows);
        });
    });

    c.bench_function("batch_read_row_64x384", |b| {
        b.iter(|| {
            let row = unsafe { view.read_row(black_box(31)) }.unwrap();
            black_box(row);
        });
    });
}

criterion_group!(benches, bench_encode, bench_read_all);
criterion_main!(benches);
