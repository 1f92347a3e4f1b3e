mod common;

use common::{CLIENT, connect, connect_n, input, run};
use duet::{ArithSecret, BoolSecret, Config, Error, Origin, TripleStrategy};

#[tokio::test]
async fn and_add_and_less_than_at_width_64() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let x = BoolSecret::new(&party, 64, 4)?
            .with_value(input(&party, CLIENT, 5))
            .share(CLIENT)
            .await?;
        let y = BoolSecret::new(&party, 64, 4)?
            .with_value(input(&party, CLIENT, 10))
            .share(CLIENT)
            .await?;
        let a = ArithSecret::new(&party, 64, 4)?
            .with_value(input(&party, CLIENT, 5))
            .share(CLIENT)
            .await?;
        let b = ArithSecret::new(&party, 64, 4)?
            .with_value(input(&party, CLIENT, 10))
            .share(CLIENT)
            .await?;
        let and = x.and(&y).await?.reconstruct(CLIENT).await?;
        let sum = a.add(&b)?.reconstruct(CLIENT).await?;
        let less = x.less_than(&y).await?.reconstruct(CLIENT).await?;
        Ok((and, sum, less))
    })
    .await?;
    assert_eq!(results[CLIENT], (Some(0), Some(15), Some(1)));
    assert_eq!(results[0], (None, None, None));
    assert_eq!(results[1], (None, None, None));
    Ok(())
}

#[tokio::test]
async fn equal_values_at_width_8_are_not_less() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let x = BoolSecret::new(&party, 8, 5)?
            .with_value(input(&party, CLIENT, 200))
            .share(CLIENT)
            .await?;
        let y = BoolSecret::new(&party, 8, 5)?
            .with_value(input(&party, CLIENT, 200))
            .share(CLIENT)
            .await?;
        x.less_than(&y).await?.reconstruct(CLIENT).await
    })
    .await?;
    assert_eq!(results[CLIENT], Some(0));
    Ok(())
}

#[tokio::test]
async fn equality_of_boolean_and_arithmetic_values() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let mut opened = vec![];
        for (x, y) in [(200, 200), (200, 201), (0, 128)] {
            let xb = BoolSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, x))
                .share(CLIENT)
                .await?;
            let yb = BoolSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, y))
                .share(CLIENT)
                .await?;
            let xa = ArithSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, x))
                .share(CLIENT)
                .await?;
            let ya = ArithSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, y))
                .share(CLIENT)
                .await?;
            opened.push(xb.equal(&yb).await?.reconstruct(CLIENT).await?);
            opened.push(xa.equal(&ya).await?.reconstruct(CLIENT).await?);
        }
        Ok(opened)
    })
    .await?;
    let expected = [1, 1, 0, 0, 0, 0].map(Some).to_vec();
    assert_eq!(results[CLIENT], expected);
    Ok(())
}

#[tokio::test]
async fn shares_round_trip() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let values = [0u64, 1, 77, 255];
    let results = run(&parties, move |party| async move {
        let mut opened = vec![];
        for v in values {
            let a = ArithSecret::new(&party, 8, 6)?
                .with_value(input(&party, CLIENT, v))
                .share(CLIENT)
                .await?;
            let b = BoolSecret::new(&party, 8, 6)?
                .with_value(input(&party, CLIENT, v))
                .share(CLIENT)
                .await?;
            opened.push(a.reconstruct(CLIENT).await?);
            opened.push(b.reconstruct(CLIENT).await?);
        }
        Ok(opened)
    })
    .await?;
    let expected: Vec<_> = values.iter().flat_map(|v| [Some(*v), Some(*v)]).collect();
    assert_eq!(results[CLIENT], expected);
    Ok(())
}

#[tokio::test]
async fn comparison_boundaries() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let cases = [(0u64, 0u64), (0, 255), (255, 0), (255, 255), (127, 128), (128, 127)];
    let results = run(&parties, move |party| async move {
        let mut out = vec![];
        for (x, y) in cases {
            let x = BoolSecret::new(&party, 8, 7)?
                .with_value(input(&party, CLIENT, x))
                .share(CLIENT)
                .await?;
            let y = BoolSecret::new(&party, 8, 7)?
                .with_value(input(&party, CLIENT, y))
                .share(CLIENT)
                .await?;
            out.push(x.less_than(&y).await?.reconstruct(CLIENT).await?);
        }
        Ok(out)
    })
    .await?;
    let expected: Vec<_> = cases.iter().map(|(x, y)| Some((x < y) as u64)).collect();
    assert_eq!(results[CLIENT], expected);
    Ok(())
}

#[tokio::test]
async fn mux_selects_by_condition() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let mut out = vec![];
        for c in [0, 1] {
            let cond = BoolSecret::new(&party, 1, 8)?
                .with_value(input(&party, CLIENT, c))
                .share(CLIENT)
                .await?;
            let x = BoolSecret::new(&party, 16, 8)?
                .with_value(input(&party, CLIENT, 1111))
                .share(CLIENT)
                .await?;
            let y = BoolSecret::new(&party, 16, 8)?
                .with_value(input(&party, CLIENT, 2222))
                .share(CLIENT)
                .await?;
            let a = ArithSecret::new(&party, 16, 8)?
                .with_value(input(&party, CLIENT, 3333))
                .share(CLIENT)
                .await?;
            let b = ArithSecret::new(&party, 16, 8)?
                .with_value(input(&party, CLIENT, 4444))
                .share(CLIENT)
                .await?;
            out.push(cond.mux(&x, &y).await?.reconstruct(CLIENT).await?);
            out.push(cond.mux_arith(&a, &b).await?.reconstruct(CLIENT).await?);
        }
        Ok(out)
    })
    .await?;
    assert_eq!(
        results[CLIENT],
        vec![Some(2222), Some(4444), Some(1111), Some(3333)]
    );
    Ok(())
}

#[tokio::test]
async fn conversions_round_trip() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let x = ArithSecret::new(&party, 32, 9)?
            .with_value(input(&party, CLIENT, 0xdead_beef))
            .share(CLIENT)
            .await?;
        let b = x.to_bool().await?;
        let back = b.to_arith().await?;
        let as_bool = b.reconstruct(CLIENT).await?;
        let as_arith = back.reconstruct(CLIENT).await?;
        let product = back.mul(&x).await?.reconstruct(CLIENT).await?;
        Ok((as_bool, as_arith, product))
    })
    .await?;
    let square = 0xdead_beef_u64.wrapping_mul(0xdead_beef) & 0xffff_ffff;
    assert_eq!(
        results[CLIENT],
        (Some(0xdead_beef), Some(0xdead_beef), Some(square))
    );
    Ok(())
}

#[tokio::test]
async fn local_gates() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let results = run(&parties, |party| async move {
        let x = BoolSecret::new(&party, 8, 10)?
            .with_value(input(&party, CLIENT, 0b1100_1010))
            .share(CLIENT)
            .await?;
        let y = BoolSecret::new(&party, 8, 10)?
            .with_value(input(&party, CLIENT, 0b0101_0110))
            .share(CLIENT)
            .await?;
        let a = ArithSecret::new(&party, 8, 10)?
            .with_value(input(&party, CLIENT, 3))
            .share(CLIENT)
            .await?;
        let b = ArithSecret::new(&party, 8, 10)?
            .with_value(input(&party, CLIENT, 10))
            .share(CLIENT)
            .await?;
        Ok(vec![
            x.xor(&y)?.reconstruct(CLIENT).await?,
            x.not().reconstruct(CLIENT).await?,
            x.or(&y).await?.reconstruct(CLIENT).await?,
            a.sub(&b)?.reconstruct(CLIENT).await?,
            a.neg().reconstruct(CLIENT).await?,
            a.less_than(&b).await?.reconstruct(CLIENT).await?,
        ])
    })
    .await?;
    assert_eq!(
        results[CLIENT],
        vec![
            Some(0b1001_1100),
            Some(0b0011_0101),
            Some(0b1101_1110),
            Some(249),
            Some(253),
            Some(1)
        ]
    );
    Ok(())
}

#[tokio::test]
async fn several_clients_own_and_receive_values() -> Result<(), Error> {
    let parties = connect_n(4, Config::default()).await?;
    let results = run(&parties, |party| async move {
        let x = ArithSecret::new(&party, 16, 11)?
            .with_value(input(&party, 2, 300))
            .share(2)
            .await?;
        let y = ArithSecret::new(&party, 16, 11)?
            .with_value(input(&party, 3, 7))
            .share(3)
            .await?;
        let product = x.mul(&y).await?;
        let to_three = product.reconstruct(3).await?;
        let to_server = product.reconstruct(1).await?;
        Ok((to_three, to_server))
    })
    .await?;
    assert_eq!(results[3], (Some(2100), None));
    assert_eq!(results[2], (None, None));
    assert_eq!(results[1], (None, Some(2100)));
    Ok(())
}

#[tokio::test]
async fn background_triples_feed_gates() -> Result<(), Error> {
    let config = Config::default()
        .with_triple_strategy(TripleStrategy::Background)
        .with_max_queued_triples(64)
        .with_batch_size(4);
    let parties = connect(config).await?;
    let results = run(&parties, |party| async move {
        let mut out = vec![];
        for v in [3u64, 90, 200] {
            let x = ArithSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, v))
                .share(CLIENT)
                .await?;
            let y = BoolSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, v))
                .share(CLIENT)
                .await?;
            let z = BoolSecret::new(&party, 8, 12)?
                .with_value(input(&party, CLIENT, 100))
                .share(CLIENT)
                .await?;
            out.push(x.mul(&x).await?.reconstruct(CLIENT).await?);
            out.push(y.less_than(&z).await?.reconstruct(CLIENT).await?);
        }
        Ok(out)
    })
    .await?;
    assert_eq!(
        results[CLIENT],
        vec![Some(9), Some(1), Some(164), Some(1), Some(64), Some(0)]
    );
    Ok(())
}

#[tokio::test]
async fn correlated_values_are_not_reconstructible() -> Result<(), Error> {
    let parties = connect(Config::default()).await?;
    let x = BoolSecret::from_correlation(&parties[0], 4, 13, 0b1010)?;
    assert_eq!(x.origin(), Origin::Correlated);
    assert!(matches!(x.reconstruct(CLIENT).await, Err(Error::NotReconstructible)));
    Ok(())
}
