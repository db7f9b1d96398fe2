use retort::prelude::*;

#[test]
fn emitting_an_unbound_molecule_fails() {
    let a = Molecule::<i32>::new("a");
    match a.emit(1) {
        Err(Error::Unbound(name)) => assert_eq!(name, "a"),
        other => panic!("expected an unbound error, got {:?}", other),
    }
}

#[test]
fn identical_repeated_reactions_are_rejected() {
    let pool = Pool::fixed("err", 1);
    let a = Molecule::<i32>::new("a");
    let result = site(
        &pool,
        vec![
            reaction(vec![a.wildcard()], |_| Ok(())),
            reaction(vec![a.wildcard()], |_| Ok(())),
        ],
    );
    match result {
        Err(Error::ShadowedReactions { .. }) => {}
        other => panic!("expected a shadowing error, got {:?}", other.map(|_| ())),
    }
    pool.shutdown_now();
}

#[test]
fn irrefutably_weaker_overlap_is_rejected() {
    let pool = Pool::fixed("err", 1);
    let a = Molecule::<i32>::new("a");
    let result = site(
        &pool,
        vec![
            reaction(vec![a.wildcard()], |_| Ok(())),
            reaction(vec![a.equals(1)], |_| Ok(())),
        ],
    );
    match result {
        Err(Error::Indeterminism { weaker, .. }) => assert!(weaker.contains("a(_)")),
        other => panic!("expected an indeterminism error, got {:?}", other.map(|_| ())),
    }
    pool.shutdown_now();
}

#[test]
fn distinct_constants_coexist() {
    let pool = Pool::fixed("err", 1);
    let a = Molecule::<i32>::new("a");
    let result = site(
        &pool,
        vec![
            reaction(vec![a.equals(1)], |_| Ok(())),
            reaction(vec![a.equals(2)], |_| Ok(())),
        ],
    );
    assert!(result.is_ok());
    pool.shutdown_now();
}

#[test]
fn a_molecule_binds_to_exactly_one_site() {
    let pool = Pool::fixed("err", 1);
    let a = Molecule::<i32>::new("a");
    let b = Molecule::<i32>::new("b");
    site(&pool, vec![reaction(vec![a.capture()], |_| Ok(()))]).unwrap();
    let result = site(
        &pool,
        vec![reaction(vec![a.capture(), b.capture()], |_| Ok(()))],
    );
    match result {
        Err(Error::AlreadyBound { molecule, .. }) => assert_eq!(molecule, "a"),
        other => panic!("expected an already-bound error, got {:?}", other.map(|_| ())),
    }
    // The failed install must not have claimed the other molecule.
    assert!(!b.is_bound());
    pool.shutdown_now();
}

#[test]
fn repeated_inputs_are_permitted() {
    let pool = Pool::fixed("err", 1);
    let a = Molecule::<i32>::new("a");
    let result = site(
        &pool,
        vec![reaction(vec![a.capture(), a.capture()], |_| Ok(()))],
    );
    assert!(result.is_ok());
    pool.shutdown_now();
}
