//! 公共 API 端到端场景

use std::io::{Cursor, Seek, SeekFrom};

use attribute_store::{
    AttrError, AttributeConfig, CompressionType, EnumAttribute, Float32Attribute, Index64,
    NumericAttribute,
};

fn s(v: &str) -> String { v.to_string() }

#[test]
fn interned_values_follow_document_references() {
    let mut attr: EnumAttribute<String> = EnumAttribute::new("fruit", AttributeConfig::array());
    for _ in 0..6 {
        attr.add_doc();
    }
    let apple  = attr.intern_or_get(&s("apple"));
    let banana = attr.intern_or_get(&s("banana"));
    attr.set_values(5, &[apple, banana]);
    attr.release(apple);
    attr.release(banana);
    attr.commit();

    let reader = attr.reader();
    assert_eq!(reader.get_raw_values(5), vec![s("apple"), s("banana")]);
    assert_eq!(reader.find_enum(&s("banana")), Some(banana));

    attr.set_raw_values(5, &[s("banana")]);
    attr.commit();
    assert_eq!(reader.find_enum(&s("apple")), None);
    assert_eq!(attr.enum_store().ref_count(banana), 1);
    assert_eq!(attr.value_count(5), 1);
}

#[test]
fn failed_load_leaves_stream_where_it_was() {
    let mut attr: EnumAttribute<String> = EnumAttribute::new("t", AttributeConfig::array());
    let d = attr.add_doc();
    attr.set_raw_values(d, &[s("x"), s("y")]);
    attr.commit();

    let mut data = Vec::new();
    attr.save(&mut data, CompressionType::Lz4).unwrap();
    let good_len = data.len();
    attr.save(&mut data, CompressionType::None).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xff;

    let mut cur = Cursor::new(data);
    let first: EnumAttribute<String> = EnumAttribute::load(&mut cur, "t", AttributeConfig::array()).unwrap();
    assert_eq!(first.get_raw_values(0), vec![s("x"), s("y")]);
    assert_eq!(cur.position() as usize, good_len);

    let err = EnumAttribute::<String>::load(&mut cur, "t", AttributeConfig::array()).err().unwrap();
    assert!(matches!(err, AttrError::ChecksumMismatch));
    assert_eq!(cur.position() as usize, good_len);

    cur.seek(SeekFrom::Start(0)).unwrap();
    let err = EnumAttribute::<i32>::load(&mut cur, "t", AttributeConfig::array()).err().unwrap();
    assert!(matches!(err, AttrError::TypeMismatch { .. }));
    assert_eq!(cur.position(), 0);
}

#[test]
fn numeric_attributes_store_raw_values() {
    let mut temps = Float32Attribute::new("temp", AttributeConfig::single());
    let d = temps.add_doc();
    temps.set_values(d, &[21.5]);
    temps.commit();
    assert_eq!(temps.reader().get_values(d).to_vec(), vec![21.5]);

    let mut wide: NumericAttribute<i16, Index64> = NumericAttribute::new("w", AttributeConfig::array());
    let d = wide.add_doc();
    let values: Vec<i16> = (0..300).collect();
    wide.set_values(d, &values);
    wide.commit();
    assert_eq!(wide.get_values(d).to_vec(), values);
    assert!(wide.address_space_usage().multi_value.used > 0);
}
