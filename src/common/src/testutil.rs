use crate::{Attribute, DataType, Field, Row, TableSchema};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::env;
use std::path::PathBuf;

pub fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Converts an int vector to a Row.
///
/// # Argument
///
/// * `data` - Data to put into row.
pub fn int_vec_to_row(data: Vec<i64>) -> Row {
    Row::new(data.into_iter().map(Field::IntField).collect())
}

/// Creates a Vec of rows containing IntFields given a 2D Vec of i64 's
pub fn create_row_list(row_data: Vec<Vec<i64>>) -> Vec<Row> {
    row_data.into_iter().map(int_vec_to_row).collect()
}

/// Creates a schema of IntFields with the given column names.
pub fn int_schema(names: &[&str]) -> TableSchema {
    TableSchema::new(
        names
            .iter()
            .map(|n| Attribute::new(n.to_string(), DataType::Int))
            .collect(),
    )
}

/// Creates a new table schema for a table with width number of IntFields.
pub fn get_int_table_schema(width: usize) -> TableSchema {
    let mut attrs = Vec::new();
    for i in 0..width {
        attrs.push(Attribute::new(format!("c{}", i), DataType::Int))
    }
    TableSchema::new(attrs)
}

/// Random rows of IntFields in `0..max`, with roughly one null in `null_every` values.
pub fn gen_random_int_rows(n: usize, width: usize, max: i64, null_every: u32) -> Vec<Row> {
    let mut rng = thread_rng();
    (0..n)
        .map(|_| {
            Row::new(
                (0..width)
                    .map(|_| {
                        if null_every > 0 && rng.gen_ratio(1, null_every) {
                            Field::Null
                        } else {
                            Field::IntField(rng.gen_range(0..max))
                        }
                    })
                    .collect(),
            )
        })
        .collect()
}

pub fn gen_rand_string(n: usize) -> String {
    thread_rng()
        .sample_iter(Alphanumeric)
        .take(n)
        .map(char::from)
        .collect()
}

pub fn gen_random_dir() -> PathBuf {
    init();
    let mut dir = env::temp_dir();
    dir.push(String::from("relinterp"));
    let rand_string = gen_rand_string(10);
    dir.push(rand_string);
    dir
}

/// Compares two row lists ignoring order.
pub fn compare_unordered_rows(a: &[Row], mut b: Vec<Row>) -> bool {
    if a.len() != b.len() {
        return false;
    }
    for x in a {
        match b.iter().position(|y| y == x) {
            None => return false,
            Some(idx) => {
                b.swap_remove(idx);
            }
        }
    }
    b.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;

    #[test]
    fn test_compare() {
        let mut rng = thread_rng();
        let a = gen_random_int_rows(100, 3, 50, 0);
        assert!(compare_unordered_rows(&a, a.clone()));
        let mut b = a.clone();
        b.shuffle(&mut rng);
        assert!(compare_unordered_rows(&a, b));
        let shorter = a[..99].to_vec();
        assert!(!compare_unordered_rows(&a, shorter));
        let mut changed = a.clone();
        changed[rng.gen_range(0..a.len())] = int_vec_to_row(vec![-1, -1, -1]);
        assert!(!compare_unordered_rows(&a, changed));
    }

    #[test]
    fn test_random_rows_shape() {
        let rows = gen_random_int_rows(10, 4, 5, 3);
        assert_eq!(rows.len(), 10);
        assert!(rows.iter().all(|r| r.size() == 4));
    }
}
