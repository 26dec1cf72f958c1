use pretty_assertions::assert_eq;

use kitsune_graph::Kitsune;

#[test]
fn add_forward() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(2.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(3.0).unwrap();
    let c = a.add(&b).unwrap();
    c.execute().unwrap();
    assert_eq!(c.retrieve().unwrap(), vec![5.0; 4]);
}

#[test]
fn sub_forward() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).init(&[5.0, 6.0, 7.0, 8.0]).unwrap();
    let b = kitsune.tensor([2, 2]).init(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    let c = a.sub(&b).unwrap();
    assert_eq!(c.retrieve().unwrap(), vec![4.0; 4]);
}

#[test]
fn add_broadcasts_rows_against_columns() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 1]).init(&[1.0, 2.0]).unwrap();
    let b = kitsune.tensor([1, 3]).init(&[10.0, 20.0, 30.0]).unwrap();
    let c = a.add(&b).unwrap();
    assert_eq!(c.shape(), &[1, 1, 2, 3]);
    assert_eq!(
        c.retrieve().unwrap(),
        vec![11.0, 21.0, 31.0, 12.0, 22.0, 32.0]
    );
}

#[test]
fn gemm_forward() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 3]).fill(1.0).unwrap();
    let b = kitsune.tensor([3, 2]).fill(2.0).unwrap();
    let c = a.gemm(&b).unwrap();
    c.execute().unwrap();
    assert_eq!(c.retrieve().unwrap(), vec![6.0; 4]);
}

#[test]
fn gemm_rejects_inner_mismatch() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 3]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 3]).fill(1.0).unwrap();
    assert!(a.gemm(&b).is_err());
}

#[test]
fn transpose_and_reshape_chain() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune
        .tensor([2, 3])
        .init(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
        .unwrap();
    let t = a.transpose(&[1, 0]).unwrap();
    assert_eq!(t.shape(), &[1, 1, 3, 2]);
    assert_eq!(t.retrieve().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

    // Reshaping the transposed view forces a contiguous copy under the hood.
    let r = t.reshape(&[6]).unwrap();
    assert_eq!(r.retrieve().unwrap(), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);

    let inferred = a.reshape(&[3, -1]).unwrap();
    assert_eq!(inferred.shape(), &[1, 1, 3, 2]);
}

#[test]
fn reduce_sum_rows_and_total() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune
        .tensor([2, 3])
        .init(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
        .unwrap();
    let rows = a.reduce_sum(&[1], 2).unwrap();
    assert_eq!(rows.shape(), &[1, 1, 2, 1]);
    assert_eq!(rows.retrieve().unwrap(), vec![3.0, 12.0]);

    let total = a.reduce_sum(&[0, 1], 2).unwrap();
    assert_eq!(total.retrieve().unwrap(), vec![15.0]);
}

#[test]
fn execute_is_idempotent() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let c = a.add(&b).unwrap();
    c.execute().unwrap();
    let first = c.storage().unwrap().id();
    c.execute().unwrap();
    let second = c.storage().unwrap().id();
    assert_eq!(first, second);
}

#[test]
fn lazy_until_executed() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let c = a.add(&b).unwrap();
    assert!(c.storage().is_none());
    assert_eq!(c.get(&[0, 0]).unwrap(), 2.0);
    assert!(c.storage().is_some());
}

#[test]
fn display_renders_materialized_values() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).init(&[1.0, 2.0, 3.0, 4.0]).unwrap();
    assert_eq!(a.to_string(), "[[1, 2], [3, 4]]");
    let b = kitsune.tensor([2, 2]).fill(0.0).unwrap();
    let c = a.add(&b).unwrap();
    assert_eq!(c.to_string(), "Tensor(2x2, pending)");
}

#[test]
fn handles_are_conserved() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    assert_eq!(kitsune.node_count(), 2);
    assert_eq!(kitsune.storage_count(), 2);
    {
        let c = a.add(&b).unwrap();
        c.execute().unwrap();
        assert_eq!(kitsune.node_count(), 3);
        assert_eq!(kitsune.storage_count(), 3);
    }
    // Dropping the result handle releases the op node and its output storage.
    assert_eq!(kitsune.node_count(), 2);
    assert_eq!(kitsune.storage_count(), 2);
}

#[test]
fn ref_count_cascade_through_shared_leaves() {
    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let c = a.add(&b).unwrap();
    let d = a.sub(&b).unwrap();
    let e = c.add(&d).unwrap();
    assert_eq!(kitsune.node_count(), 5);
    drop(e);
    drop(c);
    drop(d);
    assert_eq!(kitsune.node_count(), 2);
    drop(a);
    drop(b);
    assert_eq!(kitsune.node_count(), 0);
    assert_eq!(kitsune.storage_count(), 0);
}

#[test]
fn dot_dump_has_a_stable_header() {
    use indoc::indoc;

    let kitsune = Kitsune::new().unwrap();
    let a = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let b = kitsune.tensor([2, 2]).fill(1.0).unwrap();
    let _c = a.add(&b).unwrap();
    let expected = indoc! {"
        digraph kitsune {
            rankdir = BT;
    "};
    let dot = kitsune.to_dot();
    assert!(dot.starts_with(expected));
    assert_eq!(dot.matches("Axpy(1)").count(), 1);
}
