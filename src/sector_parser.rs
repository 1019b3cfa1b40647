//! Parses sectors given as short strings, as on the command line:
//! `circle(x,y,r)`, `rect(x1,y1,x2,y2)`, `poly(x1,y1,x2,y2,x3,y3,...)` and
//! `box(x1,y1,z1,x2,y2,z2)`.

use crate::error::BeamError;
use crate::grids::Sector;

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, multispace0},
    combinator::{all_consuming, map_res},
    multi::separated_list1,
    number::complete::double,
    sequence::{delimited, preceded},
    Finish, IResult,
};

use std::str::FromStr;

fn number(s: &str) -> IResult<&str, f64> {
    delimited(multispace0, double, multispace0)(s)
}

/// The comma separated numbers between parentheses.
fn arguments(s: &str) -> IResult<&str, Vec<f64>> {
    delimited(char('('), separated_list1(char(','), number), char(')'))(s)
}

fn exactly<const N: usize>(values: Vec<f64>) -> Result<[f64; N], String> {
    let len = values.len();
    values
        .try_into()
        .map_err(|_| format!("expected {N} numbers, got {len}"))
}

fn parse_circle(s: &str) -> IResult<&str, Sector> {
    map_res(preceded(tag("circle"), arguments), |args| {
        exactly::<3>(args).map(|[x, y, r]| Sector::Circle { x, y, r })
    })(s)
}

fn parse_rect(s: &str) -> IResult<&str, Sector> {
    map_res(preceded(tag("rect"), arguments), |args| {
        exactly::<4>(args).map(|[x1, y1, x2, y2]| Sector::Rect { x1, y1, x2, y2 })
    })(s)
}

fn parse_poly(s: &str) -> IResult<&str, Sector> {
    map_res(preceded(tag("poly"), arguments), |args: Vec<f64>| {
        if args.len() < 6 || args.len() % 2 != 0 {
            return Err(format!(
                "expected at least three x,y pairs, got {} numbers",
                args.len()
            ));
        }
        Ok(Sector::Polygon(
            args.chunks_exact(2).map(|xy| [xy[0], xy[1]]).collect(),
        ))
    })(s)
}

fn parse_box(s: &str) -> IResult<&str, Sector> {
    map_res(preceded(tag("box"), arguments), |args| {
        exactly::<6>(args).map(|[x1, y1, z1, x2, y2, z2]| Sector::Cuboid {
            p1: [x1, y1, z1],
            p2: [x2, y2, z2],
        })
    })(s)
}

fn parse_sector(s: &str) -> IResult<&str, Sector> {
    all_consuming(delimited(
        multispace0,
        alt((parse_circle, parse_rect, parse_poly, parse_box)),
        multispace0,
    ))(s)
}

impl FromStr for Sector {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match parse_sector(s).finish() {
            Ok((_remaining, sector)) => Ok(sector),
            Err(_) => Err(BeamError::ParseError(s.to_string())),
        }
    }
}
