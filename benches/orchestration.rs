use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use grupo::core::{validate_label, TopologyMode};
use grupo::gr::{auto_increment_values, convert_ipwhitelist_to_netmask};
use grupo::reconcile::OptionFile;
use grupo::replicaset::{apply_seeds_change, SeedsChange};

/// Seeds list of `size` members
fn seeds_of(size: usize) -> String {
    (1..=size)
        .map(|i| format!("db{}.example.com:33061", i))
        .collect::<Vec<_>>()
        .join(",")
}

/// Option file with `options` entries in `[mysqld]` and a few other groups
fn option_file_of(options: usize) -> String {
    let mut content = String::from("# generated\n[client]\nport = 3306\n\n[mysqld]\n");
    for i in 0..options {
        content.push_str(&format!("option-{} = value_{}\n", i, i));
    }
    content.push_str("skip-log-bin\n\n[mysqldump]\nquick\n");
    content
}

fn bench_auto_increment(c: &mut Criterion) {
    let mut group = c.benchmark_group("auto_increment");

    for size in [3u64, 9, 64].iter() {
        group.bench_with_input(BenchmarkId::new("multi_primary", size), size, |b, &size| {
            b.iter(|| {
                for server_id in 1..=size {
                    black_box(auto_increment_values(
                        TopologyMode::MultiPrimary,
                        black_box(size),
                        black_box(server_id * 1000 + 7),
                    ));
                }
            });
        });
    }

    group.finish();
}

fn bench_seeds(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_seeds");

    for size in [3usize, 9, 100].iter() {
        let current = seeds_of(*size);
        let add = SeedsChange::Add("new.example.com:33061".to_string());
        let remove = SeedsChange::Remove("db2.example.com:33061".to_string());

        group.bench_with_input(BenchmarkId::new("add", size), &current, |b, current| {
            b.iter(|| black_box(apply_seeds_change(black_box(current), &add)));
        });
        group.bench_with_input(BenchmarkId::new("remove", size), &current, |b, current| {
            b.iter(|| black_box(apply_seeds_change(black_box(current), &remove)));
        });
    }

    group.finish();
}

fn bench_allowlist(c: &mut Criterion) {
    let allowlist = "192.168.1.0/24,10.0.0.0/8,172.16.0.0/12,db1.example.com,10.1.2.3";

    c.bench_function("allowlist_to_netmask", |b| {
        b.iter(|| black_box(convert_ipwhitelist_to_netmask(black_box(allowlist))))
    });
}

fn bench_labels(c: &mut Criterion) {
    let labels = ["db1.example.com:3306", "node_01", "a-very-long-label.with.many.parts:33060"];

    c.bench_function("validate_label", |b| {
        b.iter(|| {
            for label in labels.iter() {
                let _ = black_box(validate_label(black_box(label)));
            }
        })
    });
}

fn bench_option_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("option_file");

    for options in [10usize, 100, 1000].iter() {
        let content = option_file_of(*options);
        group.bench_with_input(BenchmarkId::new("parse", options), &content, |b, content| {
            b.iter(|| black_box(OptionFile::parse("my.cnf", black_box(content))))
        });
        group.bench_with_input(BenchmarkId::new("edit_render", options), &content, |b, content| {
            b.iter(|| {
                if let Ok(mut file) = OptionFile::parse("my.cnf", content) {
                    file.set("gtid_mode", Some("ON"));
                    file.remove("skip_log_bin");
                    black_box(file.render());
                }
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_auto_increment,
    bench_seeds,
    bench_allowlist,
    bench_labels,
    bench_option_file
);

criterion_main!(benches);
