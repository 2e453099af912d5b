use criterion::{black_box, criterion_group, criterion_main, Criterion};
use idom_core::{Component, ComponentRef, OpenCall, Props, RenderCx};
use idom_testing::TestRoot;

#[derive(Default)]
struct Row;

impl Component for Row {
    fn render(&self, cx: &RenderCx<'_>) {
        let label = cx.props().str("label").unwrap_or_default().to_string();
        cx.open(OpenCall::new("li"));
        cx.text(label);
        cx.close("li");
    }
}

#[derive(Default)]
struct Table;

impl Component for Table {
    fn render(&self, cx: &RenderCx<'_>) {
        let count = cx.props().int("count").unwrap_or(0);
        let reversed = cx.props().bool("reversed").unwrap_or(false);
        let row = ComponentRef::of::<Row>();
        cx.open(OpenCall::new("ul"));
        let keys: Vec<i64> = if reversed {
            (0..count).rev().collect()
        } else {
            (0..count).collect()
        };
        for key in keys {
            cx.open(
                OpenCall::new(row.clone())
                    .key(key.to_string())
                    .attr("label", format!("row {key}")),
            );
            cx.close(row.clone());
        }
        cx.close("ul");
    }
}

fn rows(count: i64, reversed: bool) -> Props {
    Props::new()
        .with("count", count)
        .with("reversed", reversed)
}

fn keyed_reorder(c: &mut Criterion) {
    let root = TestRoot::new();
    let handle = root
        .mount(&ComponentRef::of::<Table>(), rows(200, false))
        .expect("initial render");
    let mut reversed = false;

    c.bench_function("keyed_reorder_200", |b| {
        b.iter(|| {
            reversed = !reversed;
            black_box(handle.update(rows(200, reversed)).expect("update"));
        });
    });
}

fn unchanged_patch(c: &mut Criterion) {
    let root = TestRoot::new();
    let handle = root
        .mount(&ComponentRef::of::<Table>(), rows(200, false))
        .expect("initial render");

    c.bench_function("unchanged_patch_200", |b| {
        b.iter(|| handle.patch().expect("patch"));
    });
}

criterion_group!(benches, keyed_reorder, unchanged_patch);
criterion_main!(benches);
