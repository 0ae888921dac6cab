//! Static, offline product table consulted when live search comes back thin.
//!
//! A catalog is a list of rules. Each rule pairs a predicate over the
//! normalized prompt with the products it contributes, so new rules can be
//! added without touching the pipeline.

use std::collections::HashSet;

use tracing::info;

use crate::models::{Origin, Price, Product};

type Predicate = Box<dyn Fn(&str) -> bool + Send + Sync>;

pub struct FallbackRule {
    name: &'static str,
    predicate: Predicate,
    products: Vec<Product>,
}

impl FallbackRule {
    pub fn new<P>(name: &'static str, predicate: P, products: Vec<Product>) -> Self
    where
        P: Fn(&str) -> bool + Send + Sync + 'static,
    {
        let products = products.into_iter().map(|p| Product { origin: Origin::Fallback, ..p }).collect();
        Self { name, predicate: Box::new(predicate), products }
    }

    /// Matches when any keyword appears as a whole word (or word run) in the prompt.
    pub fn keywords(name: &'static str, keywords: &[&str], products: Vec<Product>) -> Self {
        let needles: Vec<String> = keywords.iter().map(|k| format!(" {} ", normalize(k))).collect();
        Self::new(
            name,
            move |prompt: &str| {
                let padded = format!(" {prompt} ");
                needles.iter().any(|n| padded.contains(n.as_str()))
            },
            products,
        )
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, normalized_prompt: &str) -> bool {
        (self.predicate)(normalized_prompt)
    }
}

pub struct FallbackCatalog {
    rules: Vec<FallbackRule>,
}

impl FallbackCatalog {
    pub fn new(rules: Vec<FallbackRule>) -> Self {
        Self { rules }
    }

    /// Every eligible product of every matching rule, in rule order, without duplicate links.
    pub fn candidates(&self, prompt: &str) -> Vec<Product> {
        let normalized = normalize(prompt);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for rule in self.rules.iter().filter(|r| r.matches(&normalized)) {
            info!("   📚 Fallback rule '{}' matched", rule.name());
            for product in rule.products.iter().filter(|p| p.is_eligible()) {
                if seen.insert(product.product_link.clone()) {
                    out.push(product.clone());
                }
            }
        }
        out
    }

    /// Fallback products to append after `live`, skipping links already present
    /// and stopping once the combined list would exceed `cap`.
    pub fn supplement(&self, prompt: &str, live: &[Product], cap: usize) -> Vec<Product> {
        let room = cap.saturating_sub(live.len());
        let taken: HashSet<&str> = live.iter().map(|p| p.product_link.as_str()).collect();
        self.candidates(prompt)
            .into_iter()
            .filter(|p| !taken.contains(p.product_link.as_str()))
            .take(room)
            .collect()
    }

    /// Hand-picked listings for the most common requests.
    pub fn curated() -> Self {
        Self::new(vec![
            FallbackRule::keywords(
                "flannel",
                &["flannel", "flannels", "plaid", "lumberjack", "overshirt"],
                vec![
                    entry("L.L.Bean", "Men's Scotch Plaid Flannel Shirt, Traditional Fit", 59.95,
                        "https://global.llbean.com/dw/image/v2/BBDS_PRD/on/demandware.static/-/Sites-llbean-master-catalog/default/dw0f6c1b7a/images/hi-res/233007_3019_41.jpg",
                        "https://www.llbean.com/llb/shop/29318?page=scotch-plaid-flannel-shirt-traditional-fit"),
                    entry("Uniqlo", "Flannel Long-Sleeve Checked Shirt", 39.90,
                        "https://image.uniqlo.com/UQ/ST3/AsianCommon/imagesgoods/459591/item/goods_15_459591.jpg",
                        "https://www.uniqlo.com/us/en/products/E459591-000/00"),
                    entry("Carhartt", "Loose Fit Midweight Flannel Long-Sleeve Plaid Shirt", 49.99,
                        "https://www.carhartt.com/dw/image/v2/BCFB_PRD/on/demandware.static/-/Sites-carhartt_master_catalog/default/images/105432_R81.jpg",
                        "https://www.carhartt.com/product/105432/mens-loose-fit-midweight-flannel-long-sleeve-plaid-shirt"),
                    entry("Pendleton", "Women's Plaid Flannel Board Shirt", 139.00,
                        "https://www.pendleton-usa.com/dw/image/v2/BCBZ_PRD/on/demandware.static/-/Sites-pendleton-master/default/images/large/RA066-53654.jpg",
                        "https://www.pendleton-usa.com/womens-wool-board-shirt/RA066.html"),
                ],
            ),
            FallbackRule::keywords(
                "denim",
                &["jeans", "jean", "denim"],
                vec![
                    entry("Levi's", "501 Original Fit Men's Jeans", 79.50,
                        "https://lsco.scene7.com/is/image/lsco/005010114-front-pdp.jpg",
                        "https://www.levi.com/US/en_US/clothing/men/jeans/501-original-fit-mens-jeans/p/005010114"),
                    entry("Madewell", "The Perfect Vintage Jean", 138.00,
                        "https://www.madewell.com/images/NB461_DM4027_m.jpg",
                        "https://www.madewell.com/the-perfect-vintage-jean-in-ellendale-wash-NB461.html"),
                    entry("Uniqlo", "Selvedge Regular-Fit Jeans", 59.90,
                        "https://image.uniqlo.com/UQ/ST3/AsianCommon/imagesgoods/455474/item/goods_69_455474.jpg",
                        "https://www.uniqlo.com/us/en/products/E455474-000/00"),
                ],
            ),
            FallbackRule::keywords(
                "dress",
                &["dress", "dresses", "sundress", "gown"],
                vec![
                    entry("Reformation", "Juliette Linen Dress", 248.00,
                        "https://media.thereformation.com/image/upload/q_auto:eco/c_scale,w_800/v1/prod/product_images/juliette-linen-dress/red/juliette-linen-dress-red-1.jpg",
                        "https://www.thereformation.com/products/juliette-linen-dress/1311393RED.html"),
                    entry("J.Crew", "Cotton Poplin Midi Shirtdress", 128.00,
                        "https://www.jcrew.com/s7-img-facade/BQ723_WT0002",
                        "https://www.jcrew.com/p/womens/categories/clothing/dresses/shirtdresses/cotton-poplin-midi-shirtdress/BQ723"),
                ],
            ),
            FallbackRule::keywords(
                "tailoring",
                &["suit", "suits", "blazer", "tuxedo", "formal", "wedding"],
                vec![
                    entry("SuitSupply", "Havana Navy Suit", 499.00,
                        "https://cdn.suitsupply.com/image/upload/b_rgb:efefef,bo_200px_solid_rgb:efefef,c_pad,w_800/f_auto,q_auto,fl_progressive/products/Suits/default/Summer/P6405_1.jpg",
                        "https://suitsupply.com/en-us/men/suits/havana-navy-suit/P6405.html"),
                    entry("J.Crew", "Ludlow Slim-Fit Suit Jacket in Italian Wool", 525.00,
                        "https://www.jcrew.com/s7-img-facade/AY390_NA6010",
                        "https://www.jcrew.com/p/mens/categories/clothing/suiting/ludlow-slim-fit-suit-jacket-in-italian-wool/AY390"),
                ],
            ),
            FallbackRule::keywords(
                "outerwear",
                &["jacket", "coat", "parka", "puffer", "winter"],
                vec![
                    entry("Patagonia", "Men's Down Sweater Jacket", 279.00,
                        "https://www.patagonia.com/dw/image/v2/BDJB_PRD/on/demandware.static/-/Sites-patagonia-master/default/images/hi-res/84675_BLK.jpg",
                        "https://www.patagonia.com/product/mens-down-sweater-jacket/84675.html"),
                    entry("Uniqlo", "Ultra Light Down Jacket", 79.90,
                        "https://image.uniqlo.com/UQ/ST3/AsianCommon/imagesgoods/469869/item/goods_09_469869.jpg",
                        "https://www.uniqlo.com/us/en/products/E469869-000/00"),
                ],
            ),
            FallbackRule::keywords(
                "knitwear",
                &["hoodie", "sweatshirt", "sweater", "cardigan", "crewneck"],
                vec![
                    entry("Champion", "Reverse Weave Pullover Hoodie", 75.00,
                        "https://www.champion.com/dw/image/v2/BCJT_PRD/on/demandware.static/-/Sites-champion-master/default/images/GF68_Y06145_BKC_F.jpg",
                        "https://www.champion.com/reverse-weave-hoodie-c-logo-GF68Y06145.html"),
                    entry("Everlane", "The Cashmere Crew", 145.00,
                        "https://media.everlane.com/image/upload/c_fill,w_800/v1/i/cashmere-crew-black.jpg",
                        "https://www.everlane.com/products/mens-cashmere-crew-black"),
                ],
            ),
            FallbackRule::keywords(
                "tees",
                &["t shirt", "tshirt", "tee", "tees"],
                vec![
                    entry("Uniqlo", "Supima Cotton Crew Neck Short-Sleeve T-Shirt", 14.90,
                        "https://image.uniqlo.com/UQ/ST3/AsianCommon/imagesgoods/455359/item/goods_00_455359.jpg",
                        "https://www.uniqlo.com/us/en/products/E455359-000/00"),
                    entry("Everlane", "The Organic Cotton Crew", 30.00,
                        "https://media.everlane.com/image/upload/c_fill,w_800/v1/i/organic-crew-white.jpg",
                        "https://www.everlane.com/products/mens-organic-cotton-crew-white"),
                ],
            ),
        ])
    }
}

fn entry(brand: &str, name: &str, price: f64, image_url: &str, product_link: &str) -> Product {
    Product {
        brand: brand.to_string(),
        name: name.to_string(),
        price: Some(Price::Amount(price)),
        image_url: image_url.to_string(),
        product_link: product_link.to_string(),
        origin: Origin::Fallback,
    }
}

/// Lowercases and collapses everything that isn't a letter or digit into single spaces.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
