//! # attribute-store 使用案例
//!
//! 1. 创建去重字符串 Attribute，写入多值文档
//! 2. 读线程持有 guard 并发读取
//! 3. 覆盖、清空文档后 commit，观察回收
//! 4. 数值 Attribute 与 large 向量
//! 5. 保存为 LZ4 压缩的枚举值文件并重新加载

use std::io::Cursor;

use attribute_store::{
    AttributeConfig, CompactionStrategy, CompressionType, EnumAttribute, Int64Attribute,
};

fn main() -> attribute_store::Result<()> {
    println!("═══════════════════════════════════════════════════════════");
    println!("   attribute-store 演示                                    ");
    println!("═══════════════════════════════════════════════════════════\n");

    // =========================================================================
    // 1. 去重字符串 Attribute
    // =========================================================================
    println!("【1】写入 tags ...");
    let config = AttributeConfig::array()
        .compaction(CompactionStrategy::default().min_dead(1).max_dead_ratio(0.2));
    let mut tags: EnumAttribute<String> = EnumAttribute::new("tags", config);
    let rows: [&[&str]; 5] = [
        &["rust", "storage"],
        &["Rust", "olap"],
        &[],
        &["storage", "olap", "rust"],
        &["columnar"],
    ];
    for row in rows {
        let doc = tags.add_doc();
        let values: Vec<String> = row.iter().map(|s| s.to_string()).collect();
        tags.set_raw_values(doc, &values);
    }
    tags.commit();
    println!("    docs   = {}", tags.num_docs());
    println!("    unique = {}", tags.enum_store().num_unique());
    println!("    usage  = {}\n", tags.address_space_usage());

    // =========================================================================
    // 2. 读线程
    // =========================================================================
    println!("【2】读线程并发读取 ...");
    let reader = tags.reader();
    std::thread::scope(|s| {
        for t in 0..2 {
            let reader = reader.clone();
            s.spawn(move || {
                let _guard = reader.guard();
                for doc in 0..reader.num_docs() as u32 {
                    let values = reader.get_raw_values(doc);
                    println!("    [reader {t}] doc {doc}: {values:?}");
                }
            });
        }
    });
    println!();

    // =========================================================================
    // 3. 覆盖与回收
    // =========================================================================
    println!("【3】覆盖文档并 commit ...");
    tags.set_raw_values(0, &["archive".to_string()]);
    tags.clear_doc(3);
    let before = tags.memory_usage();
    tags.commit();
    let after = tags.memory_usage();
    println!("    dead before commit = {}", before.dead);
    println!("    dead after commit  = {}", after.dead);
    println!("    storage still live = {:?}\n", tags.find_enum(&"storage".to_string()).is_some());

    // =========================================================================
    // 4. 数值 Attribute
    // =========================================================================
    println!("【4】数值 Attribute ...");
    let mut scores = Int64Attribute::new("scores", config);
    let small = scores.add_doc();
    let large = scores.add_doc();
    scores.set_values(small, &[3, 1, 4]);
    scores.set_values(large, &(0..100).collect::<Vec<i64>>());
    scores.commit();
    println!("    doc {small}: {:?}", scores.get_values(small).to_vec());
    println!("    doc {large}: {} values", scores.value_count(large));
    println!("    usage = {}\n", scores.address_space_usage());

    // =========================================================================
    // 5. 保存 / 加载
    // =========================================================================
    println!("【5】保存并加载 ...");
    let mut buf = Vec::new();
    let written = tags.save(&mut buf, CompressionType::Lz4)?;
    println!("    written = {written} bytes");
    let loaded: EnumAttribute<String> =
        EnumAttribute::load(&mut Cursor::new(buf), "tags", AttributeConfig::array())?;
    for doc in 0..loaded.num_docs() as u32 {
        println!("    doc {doc}: {:?}", loaded.get_raw_values(doc));
    }
    println!("\n✓ done");
    Ok(())
}
